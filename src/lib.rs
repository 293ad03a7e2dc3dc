//! hsextract: catalogs a tree of scientific data files into linked JSON metadata
//!
//! A run walks an input directory and writes one schema.org-style JSON document per
//! recognized data file into a mirrored output tree, then links them:
//!
//! 1. **Classification** -- Every visible file is sorted into one category by suffix
//!    (raster, netcdf, feature, timeseries, reference timeseries, user metadata, or
//!    unclassified). Tiles referenced by a `.vrt` are folded into it
//! 2. **Extraction** -- Each classified file goes through its format extractor, is
//!    adapted into a [`adapter::CatalogRecord`] and written as `<path>.json`
//!    (`dataset_metadata.json` for user metadata)
//! 3. **Linking** -- Every directory with user metadata becomes a dataset whose
//!    document lists the documents below it in `hasPart`; each of those gets `isPartOf`
//!
//! # Architecture
//!
//! - **Bounded concurrency** -- Extraction runs on the tokio blocking pool with at most
//!   `max_parallel` files in flight; netcdf files go through one dedicated thread
//! - **Explicit barrier** -- Outcomes flow through a single channel; linking starts only
//!   once it is drained
//! - **Per-file isolation** -- Extractor errors and timeouts fail one file, never the run
//! - **Atomic writes** -- Documents are written to a temp file and renamed into place
//!
//! # Key Modules
//!
//! - [`classify`] -- Tree walk and suffix classification
//! - [`extractors`] -- Per-format readers producing [`models::RawMetadata`]
//! - [`adapter`] -- Raw metadata to catalog record
//! - [`dispatch`] -- Extract, describe content files, merge sidecars, write
//! - [`executor`] -- Parallel and serial task groups joined by a barrier
//! - [`link`] -- `hasPart`/`isPartOf` and public URL rewriting
//! - [`storage`] -- Document storage boundary
//! - [`pipeline`] -- End-to-end run
//!
//! # Example Usage
//!
//! ```bash
//! hsextract -v extract data/ metadata/ --max-parallel 8
//! hsextract classify data/
//! ```

pub mod adapter;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod extractors;
pub mod link;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod stats;
pub mod storage;

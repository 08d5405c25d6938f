#![doc = "blot-sync: folder-to-entry synchronisation core for Blot."]

//! This crate turns the files in a blog's folder into blog entries and keeps
//! the persisted entries in step with the folder as it changes.
//!
//! Provider wire protocols (Dropbox, Google Drive, iCloud) are not included
//! here; providers are reached through the [`contract::Provider`] trait.
//!
//! # Usage
//! Build an [`entry::Entries`] over a [`contract::KeyValueStore`], hand it to a
//! [`sync::Reconciler`] together with a provider, and call
//! [`sync::Reconciler::sync`] for each blog.

pub mod blog;
pub mod build;
pub mod clock;
pub mod config;
pub mod contract;
pub mod entry;
pub mod ignore;
pub mod list;
pub mod locks;
pub mod scheduler;
pub mod store;
pub mod sync;

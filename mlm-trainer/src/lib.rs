//! # mlm-trainer
//!
//! Continuous background training for one machine-learning model.
//!
//! The [`TrainingOrchestrator`] keeps a published model fresh with respect
//! to its training data: it retrains when data changes, optionally keeps
//! searching for a better model, and lets readers wait for a fresh model
//! without ever observing a half-updated one.
//!
//! Model families plug in through [`types::Trainer`], a comparator from
//! [`models::evaluation`], and (for persistence) a [`storage::ModelCodec`].

pub mod config;
pub mod error;
pub mod models;
pub mod regression;
pub mod services;
pub mod storage;
pub mod types;

pub use error::{TrainerError, TrainerResult};
pub use services::{OrchestratorBuilder, TrainingOrchestrator};

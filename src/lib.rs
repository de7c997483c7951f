//! # Batch Media Optimizer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare della pipeline
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config` / `resolver`: configurazione tipizzata e merge a tre livelli
//! - `engine`: engine di trasformazione (ImageMagick, codec built-in) e probe
//! - `optimizer`: orchestratore parallelo, progress e aggregato
//! - `file_manager`: discovery delle immagini e pianificazione dei task
//! - `task`: task e risultati che attraversano la pipeline
//! - `progress` / `json_output`: presentazione dell'avanzamento
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use batch_media_optimizer::{resolve, BatchOrchestrator, CapabilityProbe, Config};
//!
//! let config = Arc::new(resolve(&Config::builtin_defaults(), None, None)?);
//! let orchestrator = BatchOrchestrator::with_probe(config, &CapabilityProbe::new()).await;
//! let aggregate = orchestrator.run(tasks, 4, None).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod file_manager;
pub mod format;
pub mod json_output;
pub mod optimizer;
pub mod progress;
pub mod resolver;
pub mod task;

pub use config::Config;
pub use engine::probe::CapabilityProbe;
pub use engine::{transform, Engine, EngineKind};
pub use error::{ConfigError, PipelineError, TransformError};
pub use file_manager::{DiscoveredFile, FileManager, TaskPlanner};
pub use format::ImageFormat;
pub use optimizer::{BatchAggregate, BatchOrchestrator, ProgressSink, ProgressSnapshot};
pub use resolver::resolve;
pub use task::{ProcessingResult, ProcessingTask, TransformResult};

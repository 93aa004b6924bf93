#[path = "core/geometry.rs"]
pub mod geometry;

#[path = "core/layout.rs"]
pub mod layout;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/registry.rs"]
pub mod registry;

#[path = "core/scheduler.rs"]
pub mod scheduler;

#[path = "core/tensor.rs"]
pub mod tensor;

#[path = "core/update.rs"]
pub mod update;

pub mod config;
pub mod dataset;
pub mod model;
pub mod observer;
pub mod surface;

pub use config::{AppConfig, RenderConstants, SchedulerConfig};
pub use layout::{Diagram, LayoutBuilder};
pub use registry::{Handle, Role, SlotKey, SlotRegistry, Stage};
pub use scheduler::{FrameScheduler, FrameState, TickReport};
pub use surface::{Scene, Surface};
pub use tensor::{IntermediatesBundle, Tensor};
pub use update::{FrameReport, UpdateEngine};

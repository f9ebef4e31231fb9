//! Load Driver Adapters
//!
//! Traffic generation is delegated to external tools behind two traits:
//! - [`HttpLoadGenerator`]: connection/duration driven HTTP load (autocannon)
//! - [`ScenarioRunner`]: virtual-user scenarios, including WebSocket (artillery)
//!
//! Both adapters emit the same [`LoadTestResult`]; tool-specific optional
//! fields never leak past the adapter that parses them.

pub mod http;
pub mod process;
pub mod result;
pub mod virtual_user;

pub use http::{AutocannonCli, AutocannonOutput, HttpAdapter, HttpLoadConfig, HttpLoadGenerator};
pub use result::{
    CapacityMetrics, DriverKind, ErrorCount, LoadTestResult, RequestCounts, ResourceUsage,
    ResponseTimeSummary,
};
pub use virtual_user::{
    ArtilleryCli, ArtilleryReport, ScenarioRunner, VirtualUserAdapter, VirtualUserConfig,
};

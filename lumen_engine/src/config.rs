/// Engine configuration
///
/// Plain data with sensible defaults. Loading it from files or the command
/// line is left to the application.

use std::path::PathBuf;

/// Which validation messages reach the debug callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    ErrorsOnly,
    ErrorsAndWarnings,
    All,
}

/// Where validation messages are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugOutput {
    Console,
    File(String),
    Both(String),
}

/// Category filter for validation messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugMessageFilter {
    pub show_general: bool,
    pub show_validation: bool,
    pub show_performance: bool,
}

impl Default for DebugMessageFilter {
    fn default() -> Self {
        Self {
            show_general: true,
            show_validation: true,
            show_performance: true,
        }
    }
}

/// Validation message counters collected by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
    pub info: u32,
    pub verbose: u32,
}

impl ValidationStats {
    pub fn total(&self) -> u32 {
        self.errors + self.warnings + self.info + self.verbose
    }
}

/// Engine and backend configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Application name reported to the driver
    pub app_name: String,

    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),

    /// Enable GPU validation layers (debug builds by default)
    pub enable_validation: bool,

    /// Number of frame slots recorded ahead of the GPU
    pub frames_in_flight: usize,

    /// Clear color of the scene render pass
    pub clear_color: [f32; 4],

    /// Record the UI overlay pass after the scene pass
    pub enable_ui: bool,

    /// Directory holding precompiled SPIR-V shaders
    pub shader_directory: PathBuf,

    pub debug_severity: DebugSeverity,
    pub debug_output: DebugOutput,
    pub debug_message_filter: DebugMessageFilter,
    pub break_on_validation_error: bool,
    pub panic_on_error: bool,
    pub enable_validation_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "Lumen Application".to_string(),
            app_version: (1, 0, 0),
            enable_validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            clear_color: [0.73, 0.95, 1.0, 1.0],
            enable_ui: true,
            shader_directory: PathBuf::from("shaders"),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            debug_output: DebugOutput::Console,
            debug_message_filter: DebugMessageFilter::default(),
            break_on_validation_error: false,
            panic_on_error: false,
            enable_validation_stats: true,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

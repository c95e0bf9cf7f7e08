//! VM configuration.
//!
//! The driver hands a [`Configuration`] to the VM at construction time. The
//! configuration owns the program streams; a `None` stream makes reads yield
//! defaults and writes become no-ops.

use std::io::{BufRead, Write};

pub const KB: u64 = 1024;
pub const MB: u64 = KB * 1024;
pub const GB: u64 = MB * 1024;

/// Input/output streams of the executed program.
#[derive(Default)]
pub struct Streams {
    /// Source of Console.Read* input.
    pub input: Option<Box<dyn BufRead>>,
    /// Target of Console.Print/PrintLine output.
    pub output: Option<Box<dyn Write>>,
    /// Target of VM error reports.
    pub error: Option<Box<dyn Write>>,
}

/// Garbage collector thresholds and log target.
pub struct GcConfig {
    /// Number of pre-allocated free slabs per allocator.
    pub init_capacity: usize,
    /// Managed-byte mark below which no collection is attempted.
    pub min_memory: u64,
    /// Advisory upper bound on managed bytes; staying above it after a
    /// collection is reported as OUT_OF_MEMORY.
    pub max_memory: u64,
    /// Stream receiving the per-iteration GC report, if any.
    pub log: Option<Box<dyn Write>>,
    /// Master switch for automatic collection.
    pub allow_collect: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            init_capacity: 1,
            min_memory: 4 * MB,
            max_memory: GB,
            log: None,
            allow_collect: true,
        }
    }
}

/// Loader behavior switches.
#[derive(Clone, Debug)]
pub struct CompilationConfig {
    /// Validate every opcode against the expected grammar position.
    pub verify_bytecode: bool,
    /// Permit loading additional assemblies into a populated VM.
    pub allow_assembly_merge: bool,
    /// Reserve pool capacities ahead of reading their elements.
    pub allow_memory_preallocation: bool,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            verify_bytecode: true,
            allow_assembly_merge: true,
            allow_memory_preallocation: true,
        }
    }
}

/// Execution limits and switches.
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    /// Maximum call-stack depth before STACKOVERFLOW.
    pub recursion_limit: usize,
    /// Enforce the exit contract on the final operand stack.
    pub check_exit_code: bool,
    /// Treat program text as UTF-8 when writing to the output stream.
    pub use_unicode: bool,
    /// Forbid scripts from reconfiguring the collector.
    pub safe_mode: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 2000,
            check_exit_code: true,
            use_unicode: true,
            safe_mode: false,
        }
    }
}

/// Complete VM configuration.
#[derive(Default)]
pub struct Configuration {
    pub streams: Streams,
    pub gc: GcConfig,
    pub compilation: CompilationConfig,
    pub execution: ExecutionConfig,
}

impl Configuration {
    /// Configuration wired to the process standard streams.
    pub fn with_std_streams() -> Self {
        Self {
            streams: Streams {
                input: Some(Box::new(std::io::BufReader::new(std::io::stdin()))),
                output: Some(Box::new(std::io::stdout())),
                error: Some(Box::new(std::io::stderr())),
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let config = Configuration::default();
        assert_eq!(config.gc.min_memory, 4 * MB);
        assert_eq!(config.gc.max_memory, GB);
        assert_eq!(config.execution.recursion_limit, 2000);
        assert!(config.compilation.verify_bytecode);
        assert!(config.gc.allow_collect);
        assert!(!config.execution.safe_mode);
    }
}

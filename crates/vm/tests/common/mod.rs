//! Shared harness: runs builder-produced assemblies against a VM wired to
//! in-memory streams and captures stdout, stderr and the exit status.

use msl_vm::{Configuration, ExitStatus, VirtualMachine};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

/// Cloneable writer over a shared byte buffer.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("buffer lock")).into_owned()
    }
}

impl std::io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Loads `bytes` into a fresh VM and runs it. Returns the exit status and
/// the captured stdout and stderr text.
pub fn run_assembly(bytes: &[u8]) -> (ExitStatus, String, String) {
    run_assembly_with_input(bytes, "")
}

pub fn run_assembly_with_input(bytes: &[u8], input: &str) -> (ExitStatus, String, String) {
    let stdout = SharedBuffer::new();
    let stderr = SharedBuffer::new();
    let mut config = Configuration::default();
    config.streams.output = Some(Box::new(stdout.clone()));
    config.streams.error = Some(Box::new(stderr.clone()));
    config.streams.input = Some(Box::new(Cursor::new(input.as_bytes().to_vec())));

    let mut vm = VirtualMachine::new(config);
    vm.load_assembly(bytes).expect("assembly loads");
    let status = vm.run();
    (status, stdout.contents(), stderr.contents())
}

//! Seam to the isolated build machine.
//!
//! The machine itself is built elsewhere; actions only need to make host
//! paths visible inside it before it starts.

use std::path::{Path, PathBuf};

/// Volume registration offered to actions during `PreMachine`.
pub trait Machine {
    /// Guarantee `host_path` is visible inside the machine during `Run`.
    fn add_volume(&mut self, host_path: &Path);
}

/// Machine stand-in for builds that run directly on the host, where
/// every host path is already visible. Registered volumes are recorded.
#[derive(Debug, Default)]
pub struct HostMachine {
    volumes: Vec<PathBuf>,
}

impl HostMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volumes(&self) -> &[PathBuf] {
        &self.volumes
    }
}

impl Machine for HostMachine {
    fn add_volume(&mut self, host_path: &Path) {
        if !self.volumes.iter().any(|v| v == host_path) {
            self.volumes.push(host_path.to_path_buf());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_machine_records_unique_volumes() {
        let mut machine = HostMachine::new();
        machine.add_volume(Path::new("/recipes/scripts"));
        machine.add_volume(Path::new("/recipes/hooks"));
        machine.add_volume(Path::new("/recipes/scripts"));
        assert_eq!(
            machine.volumes(),
            &[PathBuf::from("/recipes/scripts"), PathBuf::from("/recipes/hooks")]
        );
    }
}

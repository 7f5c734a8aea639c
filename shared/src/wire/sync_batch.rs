use serde::{Deserialize, Serialize};

use super::sync_command::SyncCommand;

/// Ordered commands produced by one send cycle
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    commands: Vec<SyncCommand>,
}

impl SyncBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_commands(commands: Vec<SyncCommand>) -> Self {
        Self { commands }
    }

    pub fn push(&mut self, command: SyncCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[SyncCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<SyncCommand> {
        self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether the batch carries anything beyond path moves and mode switches
    pub fn has_changes(&self) -> bool {
        self.commands.iter().any(|command| {
            !matches!(
                command,
                SyncCommand::SetPackage { .. }
                    | SyncCommand::ExitObject
                    | SyncCommand::SetMode { .. }
                    | SyncCommand::EnterObject { type_name: None, .. }
            )
        })
    }
}

impl From<Vec<SyncCommand>> for SyncBatch {
    fn from(commands: Vec<SyncCommand>) -> Self {
        Self::from_commands(commands)
    }
}

use crate::{wire::SyncCommand, WireValue};

/// Splits a dotted instance name into the path segments it is entered by
pub fn name_segments(name: &str) -> Vec<String> {
    name.split('.').map(str::to_string).collect()
}

/// Package and object path currently open in the batch being written.
///
/// Moving to a new path exits only the divergent suffix of the open one and
/// switches package only when it differs.
#[derive(Debug, Default)]
pub struct PathStack {
    package: String,
    open: Vec<String>,
}

impl PathStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn open_path(&self) -> &[String] {
        &self.open
    }

    pub fn move_to(&mut self, package: &str, segments: &[String], commands: &mut Vec<SyncCommand>) {
        if package != self.package {
            self.close_all(commands);
            commands.push(SyncCommand::SetPackage {
                name: package.to_string(),
            });
            self.package = package.to_string();
        }
        let shared = self
            .open
            .iter()
            .zip(segments)
            .take_while(|(open, wanted)| open == wanted)
            .count();
        while self.open.len() > shared {
            self.open.pop();
            commands.push(SyncCommand::ExitObject);
        }
        for segment in &segments[shared..] {
            commands.push(SyncCommand::enter(segment));
            self.open.push(segment.clone());
        }
    }

    /// Opens `segments`, its last segment defining a new `type_name` instance
    pub fn define(
        &mut self,
        package: &str,
        segments: &[String],
        type_name: &str,
        args: Vec<WireValue>,
        commands: &mut Vec<SyncCommand>,
    ) {
        let Some((last, parent)) = segments.split_last() else {
            return;
        };
        self.move_to(package, parent, commands);
        commands.push(SyncCommand::define(last, type_name, args));
        self.open.push(last.clone());
    }

    pub fn close_all(&mut self, commands: &mut Vec<SyncCommand>) {
        while self.open.pop().is_some() {
            commands.push(SyncCommand::ExitObject);
        }
    }
}

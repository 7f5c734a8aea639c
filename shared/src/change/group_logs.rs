use log::warn;

use crate::InstanceId;

use super::{
    change_log::ChangeLog,
    change_record::{ChangeKey, ChangeRecord},
    error::ChangeLogError,
};

/// The live log of one change group plus the batch currently in flight.
///
/// At most one batch per group is in flight: [`GroupLogs::freeze`] refuses to
/// run again until [`GroupLogs::reconcile`] settles the previous one.
pub struct GroupLogs {
    name: String,
    active: ChangeLog,
    in_flight: Option<ChangeLog>,
}

impl GroupLogs {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            active: ChangeLog::new(),
            in_flight: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn active(&self) -> &ChangeLog {
        &self.active
    }

    pub fn active_mut(&mut self) -> &mut ChangeLog {
        &mut self.active
    }

    pub fn in_flight(&self) -> Option<&ChangeLog> {
        self.in_flight.as_ref()
    }

    pub fn in_flight_mut(&mut self) -> Option<&mut ChangeLog> {
        self.in_flight.as_mut()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Swaps in a fresh live log and keeps the old one as the in-flight batch
    pub fn freeze(&mut self) -> Result<&mut ChangeLog, ChangeLogError> {
        let frozen = self.take_for_send()?;
        Ok(self.in_flight.insert(frozen))
    }

    /// First half of [`GroupLogs::freeze`]: hands out the live log so the
    /// writer can splice into it. Pair with [`GroupLogs::put_in_flight`].
    pub fn take_for_send(&mut self) -> Result<ChangeLog, ChangeLogError> {
        if self.in_flight.is_some() {
            return Err(ChangeLogError::SendInFlight {
                group: self.name.clone(),
            });
        }
        Ok(std::mem::take(&mut self.active))
    }

    pub fn put_in_flight(&mut self, log: ChangeLog) {
        self.in_flight = Some(log);
    }

    /// Settles the in-flight batch.
    ///
    /// On success the batch is returned so the caller can commit it, and
    /// records made meanwhile that merely repeat it are dropped. On error the
    /// batch is merged back into the live log and `None` is returned.
    pub fn reconcile(&mut self, error: Option<&str>) -> Result<Option<ChangeLog>, ChangeLogError> {
        let Some(pending) = self.in_flight.take() else {
            return Err(ChangeLogError::NothingInFlight {
                group: self.name.clone(),
            });
        };

        match error {
            None => {
                self.drop_repeats_of(&pending);
                Ok(Some(pending))
            }
            Some(message) => {
                warn!(
                    "batch for group '{}' failed ({}); {} record(s) queued for resend",
                    self.name,
                    message,
                    pending.live_count()
                );
                let active = std::mem::take(&mut self.active);
                self.active = ChangeLog::merged(pending, active);
                Ok(None)
            }
        }
    }

    fn drop_repeats_of(&mut self, pending: &ChangeLog) {
        let mut repeats = Vec::new();
        for record in self.active.live_records() {
            let Some((instance, key)) = record.key() else {
                continue;
            };
            let Some(sent) = pending.live_record(&instance, &key) else {
                continue;
            };
            match (record, sent) {
                (
                    ChangeRecord::PropertyChange {
                        value,
                        remote_origin,
                        property,
                        ..
                    },
                    ChangeRecord::PropertyChange {
                        value: sent_value,
                        remote_origin: sent_remote,
                        ..
                    },
                ) => {
                    if value == sent_value {
                        repeats.push((instance, key));
                    } else if remote_origin != sent_remote {
                        warn!(
                            "conflicting writes to {:?}.{} during a send; keeping {:?}",
                            instance, property, value
                        );
                    }
                }
                (ChangeRecord::NewInstance { .. }, _) => repeats.push((instance, key)),
                _ => {
                    if record == sent {
                        repeats.push((instance, key));
                    }
                }
            }
        }
        for (instance, key) in repeats {
            self.active.remove_live(&instance, &key);
        }
    }

    /// Drops the live record for (instance, key) in both logs
    pub fn forget(&mut self, instance: &InstanceId, key: &ChangeKey) {
        self.active.remove_live(instance, key);
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.remove_live(instance, key);
        }
    }

    /// Drops every record not yet in flight
    pub fn clear_active(&mut self) {
        self.active = ChangeLog::new();
    }
}

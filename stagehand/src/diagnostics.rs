use crossbeam_channel::{Receiver, Sender};

use crate::registry::RecordHandle;
use crate::resource::ResourceKind;
use crate::StagehandError;

/// A problem found after the call that caused it already returned
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Usage could not be mapped, a conservative access/layout was used instead
    UnmappedUsage {
        resource: Option<RecordHandle>,
        name: Option<String>,
        error: StagehandError,
    },
    /// A submitted batch failed, its destinations hold undefined contents
    TransferFailed {
        batch: u64,
        resources: Vec<RecordHandle>,
        error: StagehandError,
    },
    /// A resource was still live when the manager shut down
    LeakedResource {
        resource: RecordHandle,
        kind: ResourceKind,
        name: Option<String>,
    },
    /// Native objects or memory of a destroyed resource could not be released
    ReleaseFailed {
        resource: RecordHandle,
        error: String,
    },
}

/// Fan-in point for [`Diagnostic`]s.
///
/// Diagnostics are logged when reported and queued on an unbounded channel; any number of
/// receivers can drain it.
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    sender: Sender<Diagnostic>,
    receiver: Receiver<Diagnostic>,
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }
}

impl DiagnosticSink {
    pub fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::UnmappedUsage { name, error, .. } => {
                tracing::warn!(
                    "{} uses a fallback access scope: {error}",
                    name.as_deref().unwrap_or("unnamed resource")
                );
            }
            Diagnostic::TransferFailed {
                batch,
                resources,
                error,
            } => {
                tracing::error!(
                    "Transfer batch {batch} covering {} resources failed: {error}",
                    resources.len()
                );
            }
            Diagnostic::LeakedResource {
                resource,
                kind,
                name,
            } => {
                tracing::warn!(
                    "Leaked {kind:?} {} ({:#x})",
                    name.as_deref().unwrap_or("unnamed"),
                    resource.to_raw()
                );
            }
            Diagnostic::ReleaseFailed { resource, error } => {
                tracing::error!("Failed to release {:#x}: {error}", resource.to_raw());
            }
        }
        // the sink owns a receiver, so the channel is never disconnected
        let _ = self.sender.send(diagnostic);
    }

    pub fn receiver(&self) -> Receiver<Diagnostic> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_reach_every_receiver_once() {
        let sink = DiagnosticSink::default();
        let receiver = sink.receiver();
        sink.report(Diagnostic::ReleaseFailed {
            resource: RecordHandle::null(),
            error: "device lost".to_string(),
        });
        assert!(matches!(
            receiver.try_recv(),
            Ok(Diagnostic::ReleaseFailed { .. })
        ));
        assert!(receiver.try_recv().is_err());
    }
}

//! Recording of consumed media.
//!
//! The session asks the configured [`RecordSink`] for a [`Recorder`] per
//! consumer and stops every recorder when it leaves the room. Writing
//! files is left to the sink.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::media::{Consumer, MediaKind};
use crate::room::Peer;

/// Where a consumer's media should be written, relative to the sink's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTarget {
    pub directory: String,
    pub file_stem: String,
    pub extension: String,
}

impl RecordTarget {
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.directory).join(format!("{}.{}", self.file_stem, self.extension))
    }
}

/// Everything known about a consumer when its recording starts.
#[derive(Debug, Clone)]
pub struct RecordContext<'a> {
    pub room_id: &'a str,
    pub local_peer: Option<&'a Peer>,
    pub producer_peer: &'a Peer,
    pub consumer_id: &'a str,
    pub producer_id: &'a str,
    pub kind: MediaKind,
}

pub type RecordPathGenerator = Arc<dyn Fn(&RecordContext<'_>) -> RecordTarget + Send + Sync>;

/// `{room}/{displayName}({peerId})_{kind}({consumerId}).{mp3|mp4}`
pub fn default_record_target(context: &RecordContext<'_>) -> RecordTarget {
    let peer = context.producer_peer;
    let extension = match context.kind {
        MediaKind::Audio => "mp3",
        MediaKind::Video => "mp4",
    };
    RecordTarget {
        directory: context.room_id.to_string(),
        file_stem: format!(
            "{}({})_{}({})",
            peer.display_name, peer.id, context.kind, context.consumer_id
        ),
        extension: extension.to_string(),
    }
}

#[async_trait]
pub trait Recorder: Send + Sync {
    async fn stop(&self);
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn start(
        &self,
        consumer: &dyn Consumer,
        target: &RecordTarget,
    ) -> anyhow::Result<Box<dyn Recorder>>;
}

/// Consumes without keeping anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

struct DiscardRecorder;

#[async_trait]
impl Recorder for DiscardRecorder {
    async fn stop(&self) {}
}

#[async_trait]
impl RecordSink for DiscardSink {
    async fn start(
        &self,
        _consumer: &dyn Consumer,
        _target: &RecordTarget,
    ) -> anyhow::Result<Box<dyn Recorder>> {
        Ok(Box::new(DiscardRecorder))
    }
}

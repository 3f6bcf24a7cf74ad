//! 🧠 InMemorySink: an object store with the lifespan of a mayfly.
//!
//! Drains the body into a `Vec<u8>` and files it under `bucket/key` in a shared map.
//! Clone the sink before handing it off and you can peek at what arrived afterwards.
//! ⚠️ NOT for production. If you dry-run a 200 GB file through this, buy more RAM. Or don't.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::backends::{ObjectSink, ObjectTarget, UploadBody};

const MAX_PREALLOC_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    objects: Arc<Mutex<HashMap<ObjectTarget, Vec<u8>>>>,
}

impl InMemorySink {
    /// 🔍 A copy of the stored object, if it made it all the way.
    pub fn object(&self, target: &ObjectTarget) -> Option<Vec<u8>> {
        self.objects.lock().get(target).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

#[async_trait]
impl ObjectSink for InMemorySink {
    async fn put_object(
        &mut self,
        target: &ObjectTarget,
        body: UploadBody,
        content_length: u64,
    ) -> Result<()> {
        // -- 📦 capacity hint only, capped so a huge content_length can't reserve the whole heap up front
        let the_hint = usize::try_from(content_length).unwrap_or(usize::MAX).min(MAX_PREALLOC_BYTES);
        let mut the_object = Vec::with_capacity(the_hint);
        // -- 🏁 recv() errs only once the channel is closed AND empty: that's the end of the object
        while let Ok(chunk) = body.recv().await {
            let chunk = chunk.context(format!(
                "💀 the body for {target} broke mid-stream. The RAM was ready. The bytes were not."
            ))?;
            the_object.extend_from_slice(&chunk);
        }

        info!("🧠 stashed {} bytes as {} in memory", the_object.len(), target);
        // ✅ only a fully drained body gets stored. half an object is no object.
        self.objects.lock().insert(target.clone(), the_object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn the_one_where_chunks_reassemble_in_order() {
        let (tx, rx) = async_channel::bounded(4);
        tx.send(Ok(Bytes::from_static(b"hello "))).await.expect("💀 send");
        tx.send(Ok(Bytes::from_static(b"world"))).await.expect("💀 send");
        drop(tx);

        let mut sink = InMemorySink::default();
        let the_spy = sink.clone();
        let target = ObjectTarget::new("b", "k");
        sink.put_object(&target, rx, 11).await.expect("💀 put failed");

        assert_eq!(the_spy.object(&target).as_deref(), Some(&b"hello world"[..]));
    }

    #[tokio::test]
    async fn the_one_where_a_broken_body_stores_nothing() {
        let (tx, rx) = async_channel::bounded(4);
        tx.send(Ok(Bytes::from_static(b"half an obj"))).await.expect("💀 send");
        tx.send(Err(std::io::Error::other("disk gave up")))
            .await
            .expect("💀 send");
        drop(tx);

        let mut sink = InMemorySink::default();
        let result = sink.put_object(&ObjectTarget::new("b", "k"), rx, 100).await;

        assert!(result.is_err());
        assert_eq!(sink.object_count(), 0);
    }
}

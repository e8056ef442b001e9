//! Shared fan-out driver for batch resolution
//!
//! Every requested name is resolved concurrently on the calling task.
//! Duplicate names join one in-flight computation, progress is reported per
//! requested name in completion order, and results are buffered into batch
//! notifications.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{BATCH_IDLE_TIMEOUT_MS, BATCH_SIZE};
use crate::version::single_flight::SingleFlight;
use crate::version::sink::{Batcher, GuardedSink, ResolveSink};
use crate::version::types::{PackageVersionData, ResolvedPackage};

/// Resolve `package_names` with `resolve_one`, returning a map keyed in input
/// order. Within one call `resolve_one` runs at most once per distinct name.
pub(crate) async fn resolve_batch<F>(
    package_names: &[String],
    sink: &dyn ResolveSink,
    resolve_one: F,
) -> IndexMap<String, PackageVersionData>
where
    F: Fn(&str) -> BoxFuture<'static, PackageVersionData> + Send,
{
    if package_names.is_empty() {
        return IndexMap::new();
    }

    let total = package_names.len();
    let inflight: SingleFlight<String, PackageVersionData> = SingleFlight::new();
    let sink = GuardedSink::new(sink);
    let mut batcher = Batcher::new(BATCH_SIZE, Duration::from_millis(BATCH_IDLE_TIMEOUT_MS));

    let mut pending: FuturesUnordered<_> = package_names
        .iter()
        .map(|name| {
            let shared = inflight.run(name.clone(), || resolve_one(name.as_str()));
            let name = name.clone();
            async move { (name, shared.await) }
        })
        .collect();

    let mut resolved: HashMap<String, PackageVersionData> = HashMap::with_capacity(total);
    let mut completed = 0;

    loop {
        tokio::select! {
            next = pending.next() => {
                let Some((name, data)) = next else {
                    break;
                };
                completed += 1;
                sink.progress(&name, completed, total);

                let ready = batcher.push(ResolvedPackage {
                    name: name.clone(),
                    data: data.clone(),
                });
                if let Some(batch) = ready {
                    sink.batch_ready(batch);
                }
                resolved.insert(name, data);
            }
            _ = tokio::time::sleep_until(batcher.deadline().unwrap_or_else(Instant::now)),
                if batcher.deadline().is_some() =>
            {
                debug!("Batch idle timeout elapsed, flushing partial batch");
                sink.batch_ready(batcher.take());
            }
        }
    }

    sink.batch_ready(batcher.take());

    package_names
        .iter()
        .map(|name| {
            let data = resolved
                .get(name)
                .cloned()
                .unwrap_or_else(PackageVersionData::unknown);
            (name.clone(), data)
        })
        .collect()
}

use crate::error::Result;
use crate::outcome::ScanOutcome;
use crate::reuse::{ReuseFlags, ScanMode};
use crate::scanner::Scanner;
use async_stream::stream;
use futures::Stream;
use std::collections::HashSet;
use std::path::PathBuf;

/// Progress events emitted by [`background_scan`].
///
/// Per storage, events follow this order:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`Scanned`](Self::Scanned) zero or more times, once per scanned path.
/// 3. [`Finished`](Self::Finished) exactly once, unless an error ended the
///    storage's pass early.
#[derive(Debug)]
pub enum BackgroundEvent {
    Started { storage: String },
    Scanned { storage: String, path: PathBuf, outcome: Box<ScanOutcome> },
    /// Nothing is left incomplete, or the remaining incomplete folders
    /// couldn't be completed this pass (`pending`).
    Finished { storage: String, pending: Option<PathBuf> },
}

/// Streams [`BackgroundEvent`]s while bringing every storage behind
/// `scanners` to a fully scanned state.
///
/// A storage with no cached data is scanned recursively from its root.
/// After that, the deepest incomplete folder is scanned with
/// [`ScanMode::RecursiveIncomplete`] and `ETAG | SIZE` reuse, again and
/// again, until none is left. A folder that comes back incomplete a second
/// time is left for the next pass.
///
/// A storage that fails (unreachable backend, cache error) yields an `Err`
/// and the stream moves on to the next storage.
pub fn background_scan<'a>(scanners: &'a [Scanner]) -> impl Stream<Item = Result<BackgroundEvent>> + 'a {
    const REUSE: ReuseFlags = ReuseFlags::ETAG.union(ReuseFlags::SIZE);
    stream!({
        for scanner in scanners {
            let storage = scanner.identifier().to_string();
            yield Ok(BackgroundEvent::Started { storage: storage.clone() });

            let has_data = match scanner.has_data().await {
                Ok(has_data) => has_data,
                Err(e) => {
                    yield Err(e);
                    continue;
                },
            };
            if !has_data {
                match scanner.scan("", ScanMode::Recursive, REUSE).await {
                    Ok(outcome) => {
                        let path = PathBuf::new();
                        yield Ok(BackgroundEvent::Scanned { storage: storage.clone(), path, outcome: Box::new(outcome) });
                    },
                    Err(e) => {
                        yield Err(e);
                        continue;
                    },
                }
            }

            let mut attempted = HashSet::new();
            let pending = loop {
                let path = match scanner.incomplete().await {
                    Ok(Some(path)) => path,
                    Ok(None) => break Ok(None),
                    Err(e) => break Err(e),
                };
                if !attempted.insert(path.clone()) {
                    tracing::debug!(storage = %storage, path = %path.display(), "Folder still incomplete; retrying next pass");
                    break Ok(Some(path));
                }
                match scanner.scan(&path, ScanMode::RecursiveIncomplete, REUSE).await {
                    Ok(outcome) => {
                        yield Ok(BackgroundEvent::Scanned { storage: storage.clone(), path, outcome: Box::new(outcome) });
                    },
                    Err(e) => break Err(e),
                }
            };
            match pending {
                Ok(pending) => yield Ok(BackgroundEvent::Finished { storage, pending }),
                Err(e) => yield Err(e),
            }
        }
    })
}

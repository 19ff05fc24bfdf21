//! Background decode requests
//!
//! A small process-wide worker set decodes blocks off the caller's thread.
//! `StreamRequest` is the poll handle: the worker publishes its outcome into
//! a shared slot, and completion, failure, and disposal all settle under the
//! slot's single mutex so a late result can never resurrect a disposed
//! request.

use std::sync::Arc;

use crossbeam_channel::Sender;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::error;

use crate::archive::block_stream::BlockStream;
use crate::archive::format::BlockInfo;
use crate::archive::shared_stream::SharedStream;

type Job = Box<dyn FnOnce() + Send>;

struct Executor {
    sender: Sender<Job>,
}

impl Executor {
    fn submit(&self, job: Job) {
        if let Err(err) = self.sender.send(job) {
            // Only reachable if every worker died; degrade to inline.
            err.into_inner()();
        }
    }
}

static EXECUTOR: Lazy<Executor> = Lazy::new(|| {
    let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .min(4);
    for _ in 0..workers {
        let receiver = receiver.clone();
        std::thread::spawn(move || {
            while let Ok(job) = receiver.recv() {
                job();
            }
        });
    }
    Executor { sender }
});

#[derive(Default)]
struct RequestSlot {
    result: Option<BlockStream>,
    done: bool,
    failed: bool,
    disposed: bool,
}

/// Poll-based handle to a block decode running on the background workers.
///
/// Dropping the handle before completion does not cancel the decode; it
/// arranges for the produced stream to be discarded instead of exposed.
pub struct StreamRequest {
    slot: Arc<Mutex<RequestSlot>>,
}

impl StreamRequest {
    /// Queues the decode immediately and returns the handle.
    pub(crate) fn spawn(source: SharedStream, block: BlockInfo) -> Self {
        let slot = Arc::new(Mutex::new(RequestSlot::default()));
        let job_slot = Arc::clone(&slot);
        EXECUTOR.submit(Box::new(move || {
            let outcome = BlockStream::open(&source, &block);
            let mut slot = job_slot.lock();
            if slot.disposed {
                return;
            }
            match outcome {
                Ok(stream) => slot.result = Some(stream),
                Err(err) => {
                    error!(error = %err, "Background block decode failed");
                    slot.failed = true;
                }
            }
            slot.done = true;
        }));
        StreamRequest { slot }
    }

    /// True once the decode has settled, in success or failure.
    pub fn is_done(&self) -> bool {
        self.slot.lock().done
    }

    /// True when the decode settled in failure.
    pub fn is_failed(&self) -> bool {
        self.slot.lock().failed
    }

    /// Takes the decoded stream once available. Returns `None` before
    /// completion, after a failure, and on every call after the first
    /// successful take.
    pub fn current_result(&self) -> Option<BlockStream> {
        self.slot.lock().result.take()
    }
}

impl Drop for StreamRequest {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        slot.disposed = true;
        slot.result = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn plain_block(data: &[u8]) -> (SharedStream, BlockInfo) {
        let mut bytes = vec![0u8; 80];
        bytes.extend_from_slice(data);
        let stream = SharedStream::new(Cursor::new(bytes));
        let mut block = BlockInfo {
            offset: 80,
            original_size: data.len() as i64,
            compressed_size: data.len() as i64,
            ..Default::default()
        };
        block.set_exists();
        (stream, block)
    }

    fn wait_done(request: &StreamRequest) {
        for _ in 0..500 {
            if request.is_done() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("request did not settle in time");
    }

    #[test]
    fn test_request_completes_and_result_is_taken_once() {
        let (stream, block) = plain_block(b"hello async");
        let request = StreamRequest::spawn(stream, block);
        wait_done(&request);

        assert!(!request.is_failed());
        let result = request.current_result().unwrap();
        assert_eq!(result.as_slice(), b"hello async");

        // Ownership already transferred.
        assert!(request.current_result().is_none());
        assert!(request.is_done());
    }

    #[test]
    fn test_request_settles_failed_on_bad_block() {
        let (stream, mut block) = plain_block(b"data");
        block.flags = 0;
        let request = StreamRequest::spawn(stream, block);
        wait_done(&request);

        assert!(request.is_failed());
        assert!(request.current_result().is_none());
    }

    #[test]
    fn test_dispose_before_completion_is_safe() {
        for _ in 0..16 {
            let (stream, block) = plain_block(b"raced");
            let request = StreamRequest::spawn(stream, block);
            drop(request);
        }
        // Give in-flight jobs time to hit the disposed path.
        std::thread::sleep(Duration::from_millis(50));
    }
}

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};

use crate::common::{KeelError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// An owned page-sized buffer moved between callers and the worker.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// Work items for the scheduler's worker thread. Buffers are owned by the
/// request, so it stays valid no matter when the worker gets to it.
enum DiskRequest {
    Read {
        page_id: PageId,
        done: Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        done: Sender<Result<()>>,
    },
    Shutdown,
}

/// DiskScheduler funnels page transfers through one worker thread, giving
/// the buffer pool a single completion point per request.
///
/// Requests queue in arrival order on a bounded channel. Shutdown is a
/// marker in the same queue, so everything submitted before it still
/// reaches the disk.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    requests: Sender<DiskRequest>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a scheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (requests, incoming) = bounded(128);
        let worker = {
            let disk_manager = Arc::clone(&disk_manager);
            thread::spawn(move || Self::run_worker(&disk_manager, incoming))
        };

        Self {
            disk_manager,
            requests,
            worker: Some(worker),
        }
    }

    /// Reads `page_id`, blocking until the worker hands the buffer back.
    pub fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        let (done, ready) = bounded(1);
        self.submit(DiskRequest::Read { page_id, done })?;
        ready
            .recv()
            .map_err(|_| KeelError::DiskScheduler("read completion lost".to_string()))?
    }

    /// Writes `data` to `page_id`, blocking until the transfer finishes.
    pub fn write_page(&self, page_id: PageId, data: PageBuf) -> Result<()> {
        let (done, ready) = bounded(1);
        self.submit(DiskRequest::Write {
            page_id,
            data,
            done,
        })?;
        ready
            .recv()
            .map_err(|_| KeelError::DiskScheduler("write completion lost".to_string()))?
    }

    fn submit(&self, request: DiskRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| KeelError::DiskScheduler("worker thread is gone".to_string()))
    }

    fn run_worker(disk_manager: &DiskManager, incoming: Receiver<DiskRequest>) {
        debug!("disk scheduler worker started");
        for request in incoming.iter() {
            match request {
                DiskRequest::Read { page_id, done } => {
                    let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
                    let outcome = disk_manager.read_page(page_id, &mut buf[..]).map(|_| buf);
                    if let Err(e) = &outcome {
                        warn!("scheduled read of {} failed: {}", page_id, e);
                    }
                    let _ = done.send(outcome);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    done,
                } => {
                    let outcome = disk_manager.write_page(page_id, &data[..]);
                    if let Err(e) = &outcome {
                        warn!("scheduled write of {} failed: {}", page_id, e);
                    }
                    let _ = done.send(outcome);
                }
                DiskRequest::Shutdown => break,
            }
        }
        debug!("disk scheduler worker stopped");
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // The marker queues behind outstanding requests, so none are lost.
        let _ = self.requests.send(DiskRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

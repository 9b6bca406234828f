//! Debounced upload loop
//!
//! One task per share waits on a bounded signal queue. Each `Again` pushes
//! the upload deadline back by the configured delay, so a burst of local
//! changes produces one upload once the share has been quiet for that long.
//! A trigger sent while the queue is full is dropped: a pending signal
//! already covers it.

use crate::share::Share;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Capacity of the signal queue
const QUEUE_DEPTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadSignal {
    /// Something changed; upload after the delay
    Again,
    /// Flush a pending upload and end the loop
    Stop,
}

/// Sending side of a share's upload queue
#[derive(Clone, Debug)]
pub struct UploadTrigger {
    tx: mpsc::Sender<UploadSignal>,
}

impl UploadTrigger {
    /// Request an upload; never blocks
    pub fn again(&self) {
        match self.tx.try_send(UploadSignal::Again) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => debug!("upload loop already stopped"),
        }
    }
}

/// Outcome of one upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReport {
    /// Blocks sent in the archive
    pub blocks: usize,
    /// Whether the cloud head moved
    pub sent: bool,
}

/// Handle on a running upload loop
pub struct Uploader {
    trigger: UploadTrigger,
    handle: JoinHandle<()>,
}

impl Uploader {
    /// Start the upload loop for `share` and route its triggers here
    ///
    /// Must be called from within a tokio runtime. An upload is scheduled
    /// right away so changes made while no loop ran get sent.
    pub fn spawn(share: Arc<Share>, delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let trigger = UploadTrigger { tx };
        share.set_trigger(trigger.clone());

        let handle = tokio::spawn(run(share, delay, rx));
        Uploader { trigger, handle }
    }

    pub fn trigger(&self) -> UploadTrigger {
        self.trigger.clone()
    }

    /// Stop the loop, waiting for a pending upload to finish
    pub async fn shutdown(self) -> Result<()> {
        // A closed queue means the loop already ended
        let _ = self.trigger.tx.send(UploadSignal::Stop).await;
        self.handle
            .await
            .map_err(|e| Error::Remote(format!("upload loop failed: {}", e)))
    }
}

async fn run(share: Arc<Share>, delay: Duration, mut rx: mpsc::Receiver<UploadSignal>) {
    let mut deadline = Some(Instant::now() + delay);
    debug!(share = %share.config().name, ?delay, "upload loop started");

    loop {
        tokio::select! {
            signal = rx.recv() => match signal {
                Some(UploadSignal::Again) => {
                    deadline = Some(Instant::now() + delay);
                }
                Some(UploadSignal::Stop) | None => {
                    if deadline.is_some() {
                        upload_in_background(&share).await;
                    }
                    break;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                upload_in_background(&share).await;
            }
        }
    }
    debug!(share = %share.config().name, "upload loop stopped");
}

async fn upload_in_background(share: &Arc<Share>) {
    let share = share.clone();
    match tokio::task::spawn_blocking(move || upload_once(&share)).await {
        Ok(Ok(report)) if report.sent => info!(blocks = report.blocks, "uploaded share"),
        Ok(Ok(_)) => debug!("nothing to upload"),
        Ok(Err(e)) => warn!(error = %e, "upload failed, will retry on next change"),
        Err(e) => error!(error = %e, "upload task panicked"),
    }
}

/// Run one upload: merge the cloud head, then send local blocks
///
/// Creates the share on the cloud side if it does not exist yet. Blocking.
pub fn upload_once(share: &Share) -> Result<UploadReport> {
    let cloud = share.cloud().ok_or_else(|| {
        Error::Config(format!("share {} has no cloud transport", share.config().name))
    })?;
    let name_hmac = share.config().name_hmac()?;

    let remote = match cloud.get_share(&name_hmac) {
        Ok(remote) => remote,
        Err(e) if e.is_not_found() => {
            info!(share = %share.config().name, "creating share in the cloud");
            cloud.create_share(&name_hmac)?
        }
        Err(e) => return Err(e),
    };

    let eft = share.eft();
    if let Some(remote_head) = remote.head {
        if remote_head != eft.snapshot_list_hash()? {
            share.merge_remote(&remote_head)?;
        }
    }

    // Take the head before the checkpoint so its blocks are in the archive
    let head = eft.snapshot_list_hash()?;
    let checkpoint = eft.make_checkpoint();
    if checkpoint.adds.is_empty() && remote.head == Some(head) {
        eft.finish_checkpoint(&checkpoint)?;
        return Ok(UploadReport {
            blocks: 0,
            sent: false,
        });
    }

    let mut archive = eft.new_archive()?;
    archive.add_list(eft.store(), &checkpoint.adds)?;
    let path = archive.finish()?;

    let sent = cloud.send_blocks(&name_hmac, &path, &head);
    if let Err(e) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "failed to remove upload archive");
    }
    sent?;

    eft.finish_checkpoint(&checkpoint)?;
    Ok(UploadReport {
        blocks: checkpoint.adds.len(),
        sent: true,
    })
}

//! Image download: handshake, bulk transfer, commit.
//!
//! Writing an image to the DAC is destructive. Nothing here retries a step,
//! a failed commit in particular must never be replayed blindly.

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{
    command::{Command, CommitMode},
    connection::Session,
    error::{DamError, DamResult, TransferError},
    response::{Reply, StatusPayload},
};

/// What the device confirmed after a successful download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub bytes: usize,
    /// Hex encoded SHA-256 of the image as sent
    pub sha256: String,
}

pub(crate) fn download(
    session: &mut Session,
    image: &[u8],
    mode: CommitMode,
) -> DamResult<TransferReceipt> {
    let command = match mode {
        CommitMode::Program => Command::Download(image),
        CommitMode::ProgramAndUpdate => Command::DownloadAndUpdate(image),
    };
    let frame = session.encode(&command)?;

    // Failing to reach the console is part of the handshake
    session
        .open_manager()
        .map_err(|e| not_ready(format!("uManager did not open: {}", e)))?;
    session.within_manager(|s| {
        match s.transact(&command, &frame) {
            Ok(Reply::Status(StatusPayload::TransferReady)) => {}
            Ok(other) => {
                return Err(not_ready(format!("unexpected reply {:?}", other)));
            }
            Err(e) => return Err(not_ready(e.to_string())),
        }
        debug!("uManager waiting for {} bytes", image.len());

        // From here on the console state is whatever the receiver made of it
        s.mark_manager_unknown();
        s.send_image(image)?;
        info!("Data sent");

        commit(s, CommitMode::Program)?;
        if mode == CommitMode::ProgramAndUpdate {
            commit(s, CommitMode::ProgramAndUpdate)?;
        }
        s.mark_manager_open();
        Ok(())
    })?;

    let receipt = TransferReceipt {
        bytes: image.len(),
        sha256: hex::encode(Sha256::digest(image)),
    };
    info!(
        "DAC reprogrammed. Image SHA-256 checksum: {}",
        receipt.sha256
    );
    Ok(receipt)
}

fn commit(session: &mut Session, mode: CommitMode) -> DamResult<()> {
    let command = Command::Commit(mode);
    let frame = session.encode(&command)?;
    session
        .transact(&command, &frame)
        .map_err(|e| TransferError::CommitFailed(e.to_string()))?;
    Ok(())
}

fn not_ready(reason: String) -> DamError {
    TransferError::DeviceNotReady(reason).into()
}

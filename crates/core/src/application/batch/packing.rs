// Size-bounded batch packing

use crate::domain::OutgoingMessage;
use crate::error::{AppError, Result};

/// Pack messages greedily, in order, into batches of at most `max_batch_bytes`.
///
/// Packing happens before anything is sent: a message that cannot fit even
/// an empty batch fails the whole call and no batch is returned.
pub fn pack_batches(
    messages: Vec<OutgoingMessage>,
    max_batch_bytes: usize,
) -> Result<Vec<Vec<OutgoingMessage>>> {
    let mut batches: Vec<Vec<OutgoingMessage>> = Vec::new();
    let mut current: Vec<OutgoingMessage> = Vec::new();
    let mut current_bytes = 0usize;

    for (offset, message) in messages.into_iter().enumerate() {
        let size = message.encoded_len();
        if size > max_batch_bytes {
            return Err(AppError::MessageTooLarge {
                index: offset + 1,
                size,
                limit: max_batch_bytes,
            });
        }
        if current_bytes + size > max_batch_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(message);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    Ok(batches)
}

use blob_store::ResumableReader;

use crate::errors::VerifyErr;
use crate::payload::{ChunkLayout, Payload};

/// Checks one downloaded block against the block that was uploaded.
pub fn compare_chunk(index: usize, expected: &[u8], actual: &[u8]) -> Result<(), VerifyErr> {
    if expected == actual {
        return Ok(());
    }
    let first_difference = expected.iter().zip(actual).position(|(e, a)| e != a);
    Err(VerifyErr::ChunkMismatch {
        chunk: index,
        first_difference,
        expected_len: expected.len(),
        actual_len: actual.len(),
    })
}

/// Reads every block of `layout` from `reader` in order and compares it with `payload`.
///
/// With `disconnect` set, the stream is cut after each block so the next one has to be read over a
/// fresh connection. `on_chunk` is told which block is about to be read. Stops at the first bad
/// block. Returns the number of bytes verified.
pub async fn verify_chunks<F>(
    reader: &mut ResumableReader,
    payload: &Payload,
    layout: &ChunkLayout,
    disconnect: bool,
    mut on_chunk: F,
) -> Result<u64, VerifyErr>
where
    F: FnMut(usize),
{
    payload.check_layout(layout)?;
    let mut buf = vec![0u8; layout.chunk_size()];
    let mut verified = 0u64;

    for (i, window) in layout.windows() {
        on_chunk(i);
        tracing::info!("Reading block {} of object {}", i, reader.key());
        let filled = reader.read_full(&mut buf).await.map_err(|source| VerifyErr::Read {
            chunk: i,
            key: reader.key().to_string(),
            source,
        })?;
        tracing::info!("Read block {} of object {} ({} bytes)", i, reader.key(), filled);

        compare_chunk(i, &payload.bytes()[window], &buf[..filled])?;
        verified += filled as u64;

        if disconnect {
            reader.disconnect();
        }
    }
    Ok(verified)
}

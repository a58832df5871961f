use super::PipelineError;
use crate::store::ChunkStore;
use loopcast_media::AtomReader;
use tokio::io::AsyncRead;

/// Move atoms from the encoder output into the store.
///
/// Returns the number of atoms read once the encoder closes its output.
pub(crate) async fn drain<R>(
    mut reader: AtomReader<R>,
    mut store: ChunkStore,
) -> Result<u64, PipelineError>
where
    R: AsyncRead + Unpin,
{
    while let Some(atom) = reader.next_atom().await? {
        store.push(atom).await?;
    }

    tracing::debug!(
        atoms = reader.atoms_read(),
        fragments = store.fragments_written(),
        media_bytes = store.media_bytes(),
        "Encoder output ended"
    );
    Ok(reader.atoms_read())
}

use super::TailError;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Connect to a running tail socket and copy everything it sends into `out`
/// until the server closes the connection. Returns the number of bytes copied.
pub async fn follow<W>(socket_path: &Path, out: &mut W) -> Result<u64, TailError>
where
    W: AsyncWrite + Unpin,
{
    let mut stream = UnixStream::connect(socket_path).await?;
    debug!(path = %socket_path.display(), "Connected to tail socket");

    let copied = tokio::io::copy(&mut stream, out).await?;
    out.flush().await?;
    Ok(copied)
}

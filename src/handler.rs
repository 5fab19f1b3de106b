//! Connection handler
//!
//! Reads the request head off a freshly accepted connection and hands the
//! request and the rest of the stream to the `RouterContainer`.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::debug;

use crate::error::WsError;
use crate::http::Request;
use crate::router::RouterContainer;

/// Handle one accepted connection
///
/// The stream is wrapped in a `BufReader` so bytes read past the request
/// head stay available to whoever handles the request.
pub async fn handle_connection<S>(
    stream: S,
    container: Arc<RouterContainer<BufReader<S>>>,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut stream = BufReader::new(stream);
    let Some(request) = Request::read_from(&mut stream).await? else {
        debug!("Connection closed before sending a request");
        return Ok(());
    };
    debug!("{} {} {}", request.method, request.target, request.version);

    container.handle(request, stream).await
}

use std::collections::HashMap;

use bytes::Bytes;
use netexpect_common::NetexpectError;
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::*;

use crate::handler::ClientHandler;

async fn open_sftp(session: &Handle<ClientHandler>) -> Result<SftpSession, NetexpectError> {
    let channel = session.channel_open_session().await?;
    channel.request_subsystem(true, "sftp").await?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(NetexpectError::other)
}

pub(crate) async fn download(
    session: &Handle<ClientHandler>,
    paths: &[String],
) -> Result<HashMap<String, Bytes>, NetexpectError> {
    let sftp = open_sftp(session).await?;
    let mut out = HashMap::new();
    for path in paths {
        let mut file = sftp.open(path).await.map_err(NetexpectError::other)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        debug!(path=%path, bytes = contents.len(), "downloaded");
        out.insert(path.clone(), Bytes::from(contents));
    }
    sftp.close().await.map_err(NetexpectError::other)?;
    Ok(out)
}

pub(crate) async fn upload(
    session: &Handle<ClientHandler>,
    files: HashMap<String, Bytes>,
) -> Result<(), NetexpectError> {
    let sftp = open_sftp(session).await?;
    for (path, contents) in files {
        let mut file = sftp.create(&path).await.map_err(NetexpectError::other)?;
        file.write_all(&contents).await?;
        file.shutdown().await?;
        debug!(path=%path, bytes = contents.len(), "uploaded");
    }
    sftp.close().await.map_err(NetexpectError::other)?;
    Ok(())
}

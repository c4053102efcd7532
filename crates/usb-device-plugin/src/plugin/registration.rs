use std::path::Path;
use std::path::PathBuf;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tonic::Request;
use tower::service_fn;
use tracing::info;

use super::api::registration_client::RegistrationClient;
use super::api::RegisterRequest;
use crate::error::PluginError;

/// register a device plugin with the kubelet listening on `kubelet_socket`
pub async fn register_with_kubelet(
    kubelet_socket: &Path,
    request: RegisterRequest,
) -> Result<(), PluginError> {
    info!(
        "registering {} (endpoint {}) with kubelet: {:?}",
        request.resource_name, request.endpoint, kubelet_socket
    );

    let channel = create_uds_channel(kubelet_socket).await?;
    let mut client = RegistrationClient::new(channel);

    client.register(Request::new(request)).await?;
    info!("successfully registered device plugin with kubelet");
    Ok(())
}

/// create Unix Domain Socket client connection
pub async fn create_uds_channel(socket_path: &Path) -> Result<Channel, PluginError> {
    let path = socket_path.to_path_buf();
    let connector_path = path.clone();

    // the URL is a placeholder, the connector always dials the socket
    Endpoint::from_static("http://tonic")
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path: PathBuf = connector_path.clone();
            async move {
                match UnixStream::connect(socket_path).await {
                    Ok(stream) => Ok(TokioIo::new(stream)),
                    Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
                }
            }
        }))
        .await
        .map_err(|source| PluginError::Connect { path, source })
}

//! HTTP/1 server on top of hyper and tokio

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{CONTENT_LENGTH, HeaderMap};
use hyper::server::conn::http1;
use hyper::service::Service;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::core::exception::{Error, Result};
use crate::core::http::{Request, Response};
use crate::core::middleware::Handler;

/// Request bodies above this many bytes are answered with 413
pub const DEFAULT_MAX_BODY_SIZE: usize = 2_621_440;

/// HTTP server dispatching every request to one handler
pub struct HttpServer {
	handler: Arc<dyn Handler>,
	max_body_size: usize,
}

impl HttpServer {
	pub fn new(handler: Arc<dyn Handler>) -> Self {
		Self {
			handler,
			max_body_size: DEFAULT_MAX_BODY_SIZE,
		}
	}

	pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
		self.max_body_size = max_body_size;
		self
	}

	/// Accept connections until `shutdown` resolves
	///
	/// Connections already being served are given the chance to finish
	/// their in-flight request before the method returns.
	pub async fn listen_with_shutdown<S>(
		self,
		addr: SocketAddr,
		shutdown: S,
	) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
	where
		S: Future<Output = ()> + Send,
	{
		let listener = TcpListener::bind(addr).await?;
		tracing::info!("Server listening on http://{}", listener.local_addr()?);
		self.serve(listener, shutdown).await
	}

	/// Serve an already bound listener
	pub async fn serve<S>(
		self,
		listener: TcpListener,
		shutdown: S,
	) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
	where
		S: Future<Output = ()> + Send,
	{
		let (stop_tx, stop_rx) = watch::channel(false);
		let mut connections = tokio::task::JoinSet::new();
		tokio::pin!(shutdown);

		loop {
			tokio::select! {
				result = listener.accept() => {
					let (stream, remote_addr) = result?;
					let service = RequestService {
						handler: self.handler.clone(),
						remote_addr,
						max_body_size: self.max_body_size,
					};
					let stop_rx = stop_rx.clone();
					connections.spawn(async move {
						if let Err(err) = Self::handle_connection(stream, service, stop_rx).await {
							tracing::warn!(%remote_addr, "Error handling connection: {}", err);
						}
					});
				}
				_ = &mut shutdown => {
					tracing::info!("Shutdown signal received, stopping server...");
					break;
				}
			}
		}

		let _ = stop_tx.send(true);
		while connections.join_next().await.is_some() {}
		tracing::info!("Server stopped");
		Ok(())
	}

	async fn handle_connection(
		stream: TcpStream,
		service: RequestService,
		mut stop_rx: watch::Receiver<bool>,
	) -> std::result::Result<(), hyper::Error> {
		let io = TokioIo::new(stream);
		let connection = http1::Builder::new().serve_connection(io, service);
		tokio::pin!(connection);

		tokio::select! {
			result = connection.as_mut() => result,
			_ = stop_rx.changed() => {
				connection.as_mut().graceful_shutdown();
				connection.await
			}
		}
	}
}

/// Convert a handler outcome into the wire response
pub fn finalize(result: Result<Response>) -> Response {
	result.unwrap_or_else(Response::from)
}

/// Collect a request body, refusing more than `limit` bytes
///
/// A declared `Content-Length` over the limit is rejected before anything
/// is read.
pub async fn read_body<B>(headers: &HeaderMap, body: B, limit: usize) -> Result<Bytes>
where
	B: Body<Data = Bytes>,
	B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
	let declared = headers
		.get(CONTENT_LENGTH)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.parse::<u64>().ok());
	if declared.is_some_and(|len| len > limit as u64) {
		return Err(body_too_large(limit));
	}

	match Limited::new(body, limit).collect().await {
		Ok(collected) => Ok(collected.to_bytes()),
		Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(body_too_large(limit)),
		Err(err) => Err(Error::BadRequest(format!("Failed to read request body: {}", err))),
	}
}

fn body_too_large(limit: usize) -> Error {
	Error::PayloadTooLarge(format!("Request body exceeds {} bytes", limit))
}

fn into_hyper(response: Response) -> std::result::Result<hyper::Response<Full<Bytes>>, hyper::http::Error> {
	let mut builder = hyper::Response::builder().status(response.status);
	for (key, value) in response.headers.iter() {
		builder = builder.header(key, value);
	}
	builder.body(Full::new(response.body))
}

/// Service implementation for hyper
struct RequestService {
	handler: Arc<dyn Handler>,
	remote_addr: SocketAddr,
	max_body_size: usize,
}

impl Service<hyper::Request<Incoming>> for RequestService {
	type Response = hyper::Response<Full<Bytes>>;
	type Error = Box<dyn std::error::Error + Send + Sync>;
	type Future =
		Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send + 'static>>;

	fn call(&self, req: hyper::Request<Incoming>) -> Self::Future {
		let handler = self.handler.clone();
		let remote_addr = self.remote_addr;
		let max_body_size = self.max_body_size;

		Box::pin(async move {
			let (parts, body) = req.into_parts();
			let body_bytes = match read_body(&parts.headers, body, max_body_size).await {
				Ok(bytes) => bytes,
				Err(err) => {
					tracing::warn!(%remote_addr, error = %err, "request body rejected");
					return Ok::<_, Self::Error>(into_hyper(Response::from(err))?);
				}
			};

			let mut request = Request::new(
				parts.method,
				parts.uri,
				parts.version,
				parts.headers,
				body_bytes,
			);
			request.remote_addr = Some(remote_addr);

			let response = finalize(handler.handle(request).await);
			Ok::<_, Self::Error>(into_hyper(response)?)
		})
	}
}

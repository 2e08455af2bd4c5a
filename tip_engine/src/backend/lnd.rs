//! LND, via its REST gateway
//!
//! Authentication is a hex-encoded macaroon sent with every request. The node's TLS certificate is usually
//! self-signed, so it can be supplied as an extra trust root.
//!
//! The invoice subscription (`/v1/invoices/subscribe`) is a long-lived response whose body is a stream of
//! newline-delimited JSON frames, each either `{"result": <Invoice>}` or `{"error": {...}}`. It reports every invoice
//! update, so frames for invoices that are not settled are skipped.
use std::{
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use futures_util::StreamExt;
use log::*;
use reqwest::{Certificate, Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tip_common::{Satoshis, Secret};

use crate::{
    backend::{Backend, BackendError, SettlementListener},
    db_types::{NewInvoice, PaymentHash},
};

pub const DEFAULT_LND_REST_HOST: &str = "https://localhost:8080";
const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest invoice update accepted from the subscription. A partial frame beyond this ends the stream.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct LndConfig {
    /// Base URL of the REST interface, e.g. `https://localhost:8080`
    pub rest_host: String,
    /// PEM certificate of the REST interface. Needed when LND uses its self-signed certificate.
    pub cert_file: Option<PathBuf>,
    /// The invoice (or admin) macaroon. Leave unset if LND runs with `--no-macaroons`.
    pub macaroon_file: Option<PathBuf>,
}

impl Default for LndConfig {
    fn default() -> Self {
        Self { rest_host: DEFAULT_LND_REST_HOST.to_string(), cert_file: None, macaroon_file: None }
    }
}

#[derive(Clone)]
struct LndSession {
    http: Client,
    macaroon: Option<Secret<String>>,
}

pub struct LndBackend {
    config: LndConfig,
    session: RwLock<Option<LndSession>>,
}

impl LndBackend {
    pub fn new(config: LndConfig) -> Self {
        Self { config, session: RwLock::new(None) }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.rest_host.trim_end_matches('/'))
    }

    fn session(&self) -> Result<LndSession, BackendError> {
        self.session.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone().ok_or(BackendError::NotConnected)
    }

    fn request(&self, session: &LndSession, method: Method, path: &str) -> RequestBuilder {
        let builder = session.http.request(method, self.url(path));
        match &session.macaroon {
            Some(macaroon) => builder.header(MACAROON_HEADER, macaroon.reveal()),
            None => builder,
        }
    }

    async fn build_session(&self) -> Result<LndSession, BackendError> {
        let mut builder = Client::builder().use_rustls_tls();
        if let Some(path) = &self.config.cert_file {
            let pem = tokio::fs::read(path).await.map_err(|e| {
                BackendError::Configuration(format!("Could not read the LND certificate {}. {e}", path.display()))
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                BackendError::Configuration(format!("{} is not a valid PEM certificate. {e}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder.build().map_err(|e| BackendError::Connection(e.to_string()))?;
        let macaroon = match &self.config.macaroon_file {
            Some(path) => Some(read_macaroon(path).await?),
            None => None,
        };
        Ok(LndSession { http, macaroon })
    }

    async fn get_info(&self, session: &LndSession) -> Result<GetInfoResponse, BackendError> {
        fetch_json(self.request(session, Method::GET, "/v1/getinfo")).await
    }

    async fn stream_settlements(&self, listener: &dyn SettlementListener) -> Result<(), BackendError> {
        let session = self.session()?;
        let response = self
            .request(&session, Method::GET, "/v1/invoices/subscribe")
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        let response = check_status(response).await?;
        info!("🔌️ Subscribed to LND invoice updates");
        listener.on_resubscribed().await;
        let mut body = response.bytes_stream();
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| BackendError::StreamTerminated(e.to_string()))?;
            for line in split_frames(&mut buffer, &chunk, MAX_FRAME_BYTES)? {
                match parse_stream_frame(&line) {
                    Ok(Some(payment_hash)) => listener.on_settled(payment_hash).await,
                    Ok(None) => {},
                    Err(BackendError::Decode(e)) => warn!("🔌️ Skipping unreadable invoice update from LND. {e}"),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for LndBackend {
    fn name(&self) -> &'static str {
        "LND"
    }

    async fn connect(&self) -> Result<(), BackendError> {
        let session = self.build_session().await?;
        let info = self.get_info(&session).await?;
        info!(
            "🔌️ Connected to LND node '{}' ({}). Synced to chain: {}",
            info.alias, info.identity_pubkey, info.synced_to_chain
        );
        *self.session.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session);
        Ok(())
    }

    async fn create_invoice(
        &self,
        description: &str,
        amount: Satoshis,
        expiry_secs: u64,
    ) -> Result<NewInvoice, BackendError> {
        let session = self.session()?;
        let request = AddInvoiceRequest {
            memo: (!description.is_empty()).then_some(description),
            value: amount.value(),
            expiry: expiry_secs,
        };
        let response: AddInvoiceResponse =
            fetch_json(self.request(&session, Method::POST, "/v1/invoices").json(&request)).await?;
        let payment_hash = decode_hash(&response.r_hash)?;
        debug!("🔌️ LND issued invoice {payment_hash} for {amount}");
        Ok(NewInvoice { invoice: response.payment_request, payment_hash })
    }

    async fn check_settled(&self, payment_hash: &PaymentHash) -> Result<bool, BackendError> {
        let session = self.session()?;
        let path = format!("/v1/invoice/{}", payment_hash.to_hex());
        let invoice: LndInvoice = fetch_json(self.request(&session, Method::GET, &path)).await?;
        Ok(invoice.is_settled())
    }

    async fn subscribe_settlements(&self, listener: &dyn SettlementListener) -> BackendError {
        match self.stream_settlements(listener).await {
            Ok(()) => BackendError::StreamTerminated("LND closed the invoice subscription".into()),
            Err(e) => e,
        }
    }

    async fn keep_alive(&self) -> Result<(), BackendError> {
        let session = self.session()?;
        self.get_info(&session).await.map(|_| ())
    }
}

//-------------------------------------------------  REST types  -----------------------------------------------------

#[derive(Debug, Serialize)]
struct AddInvoiceRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<&'a str>,
    value: i64,
    expiry: u64,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

#[derive(Debug, Default, Deserialize)]
struct LndInvoice {
    #[serde(default)]
    r_hash: String,
    /// Deprecated in LND in favour of `state`, but older nodes only send this
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    state: String,
}

impl LndInvoice {
    fn is_settled(&self) -> bool {
        self.state == "SETTLED" || self.settled
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    result: Option<LndInvoice>,
    error: Option<LndErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct LndErrorBody {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct GetInfoResponse {
    #[serde(default)]
    alias: String,
    #[serde(default)]
    identity_pubkey: String,
    #[serde(default)]
    synced_to_chain: bool,
}

//-------------------------------------------------  helpers  --------------------------------------------------------

async fn read_macaroon(path: &Path) -> Result<Secret<String>, BackendError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        BackendError::Configuration(format!("Could not read the LND macaroon {}. {e}", path.display()))
    })?;
    Ok(Secret::new(hex::encode(bytes)))
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<LndErrorBody>(&body).map(|e| e.message).unwrap_or(body);
    Err(BackendError::Rpc { status: status.as_u16(), message })
}

async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BackendError> {
    let response = request.timeout(REQUEST_TIMEOUT).send().await.map_err(|e| BackendError::Connection(e.to_string()))?;
    let response = check_status(response).await?;
    response.json::<T>().await.map_err(|e| BackendError::Decode(e.to_string()))
}

fn decode_hash(encoded: &str) -> Result<PaymentHash, BackendError> {
    STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .map(PaymentHash::from)
        .map_err(|e| BackendError::Decode(format!("Invalid r_hash '{encoded}'. {e}")))
}

/// Appends `chunk` to the partial frame in `buffer` and takes out every complete line.
///
/// Whatever remains is an unfinished frame. If it grows past `max_frame` the stream is given up.
fn split_frames(buffer: &mut Vec<u8>, chunk: &[u8], max_frame: usize) -> Result<Vec<Vec<u8>>, BackendError> {
    buffer.extend_from_slice(chunk);
    let mut lines = Vec::new();
    while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
        lines.push(buffer.drain(..=end).collect::<Vec<u8>>());
    }
    if buffer.len() > max_frame {
        let size = buffer.len();
        buffer.clear();
        return Err(BackendError::StreamTerminated(format!(
            "LND sent an invoice update of more than {max_frame} bytes ({size} bytes without a line break)"
        )));
    }
    Ok(lines)
}

/// Interprets one line of the invoice subscription. `Ok(None)` means the line carries nothing to act on.
fn parse_stream_frame(line: &[u8]) -> Result<Option<PaymentHash>, BackendError> {
    let line = std::str::from_utf8(line).map_err(|e| BackendError::Decode(e.to_string()))?.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let frame: StreamFrame = serde_json::from_str(line).map_err(|e| BackendError::Decode(e.to_string()))?;
    if let Some(err) = frame.error {
        return Err(BackendError::StreamTerminated(format!("LND reported error {}: {}", err.code, err.message)));
    }
    match frame.result {
        Some(invoice) if invoice.is_settled() => decode_hash(&invoice.r_hash).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HASH_B64: &str = "q6urq6urq6urq6urq6urq6urq6urq6urq6urq6urq6s=";

    #[test]
    fn settled_frames_yield_hashes() {
        let line = format!(r#"{{"result":{{"memo":"hi","r_hash":"{HASH_B64}","value":"1000","settled":true,"state":"SETTLED"}}}}"#);
        let hash = parse_stream_frame(format!("{line}\n").as_bytes()).unwrap();
        assert_eq!(hash, Some(PaymentHash::from([0xab; 32])));
    }

    #[test]
    fn legacy_settled_flag_is_honoured() {
        let line = format!(r#"{{"result":{{"r_hash":"{HASH_B64}","settled":true}}}}"#);
        assert!(parse_stream_frame(line.as_bytes()).unwrap().is_some());
    }

    #[test]
    fn open_invoices_and_blank_lines_are_skipped() {
        let line = format!(r#"{{"result":{{"r_hash":"{HASH_B64}","state":"OPEN"}}}}"#);
        assert_eq!(parse_stream_frame(line.as_bytes()).unwrap(), None);
        assert_eq!(parse_stream_frame(b"  \r\n").unwrap(), None);
    }

    #[test]
    fn error_frames_end_the_stream() {
        let line = br#"{"error":{"code":14,"message":"transport is closing"}}"#;
        let err = parse_stream_frame(line).unwrap_err();
        assert!(matches!(err, BackendError::StreamTerminated(m) if m.contains("transport is closing")));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(parse_stream_frame(b"{not json"), Err(BackendError::Decode(_))));
        let line = br#"{"result":{"r_hash":"%%%","state":"SETTLED"}}"#;
        assert!(matches!(parse_stream_frame(line), Err(BackendError::Decode(_))));
    }

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let mut buffer = Vec::new();
        assert!(split_frames(&mut buffer, b"{\"result\":", 64).unwrap().is_empty());
        let lines = split_frames(&mut buffer, b"{}}\n\n{\"res", 64).unwrap();
        assert_eq!(lines, vec![b"{\"result\":{}}\n".to_vec(), b"\n".to_vec()]);
        assert_eq!(buffer, b"{\"res".to_vec());
    }

    #[test]
    fn oversized_frames_end_the_stream() {
        let mut buffer = Vec::new();
        assert!(split_frames(&mut buffer, &[b'x'; 40], 64).unwrap().is_empty());
        let err = split_frames(&mut buffer, &[b'x'; 40], 64).unwrap_err();
        assert!(matches!(err, BackendError::StreamTerminated(m) if m.contains("80 bytes")));
        assert!(buffer.is_empty());
        // Complete lines are fine however long the stream runs
        let line = [[b'y'; 40].as_slice(), b"\n"].concat();
        let mut buffer = Vec::new();
        for _ in 0..10 {
            assert_eq!(split_frames(&mut buffer, &line, 64).unwrap().len(), 1);
        }
    }

    #[test]
    fn empty_memo_is_omitted() {
        let request = AddInvoiceRequest { memo: None, value: 1000, expiry: 3600 };
        assert_eq!(serde_json::to_string(&request).unwrap(), r#"{"value":1000,"expiry":3600}"#);
        let request = AddInvoiceRequest { memo: Some("coffee"), value: 5, expiry: 60 };
        assert_eq!(serde_json::to_string(&request).unwrap(), r#"{"memo":"coffee","value":5,"expiry":60}"#);
    }

    #[tokio::test]
    async fn requests_need_a_session() {
        let lnd = LndBackend::new(LndConfig::default());
        let err = lnd.check_settled(&PaymentHash::from([1; 32])).await.unwrap_err();
        assert!(matches!(err, BackendError::NotConnected));
        assert!(matches!(lnd.keep_alive().await, Err(BackendError::NotConnected)));
    }

    #[tokio::test]
    async fn unreachable_node_fails_to_connect() {
        let config = LndConfig { rest_host: "http://127.0.0.1:1".into(), ..Default::default() };
        let lnd = LndBackend::new(config);
        assert!(matches!(lnd.connect().await, Err(BackendError::Connection(_))));
        assert!(matches!(lnd.session(), Err(BackendError::NotConnected)));
    }

    #[tokio::test]
    async fn missing_macaroon_is_a_configuration_error() {
        let config = LndConfig { macaroon_file: Some("/no/such/invoice.macaroon".into()), ..Default::default() };
        let lnd = LndBackend::new(config);
        assert!(matches!(lnd.connect().await, Err(BackendError::Configuration(_))));
    }
}

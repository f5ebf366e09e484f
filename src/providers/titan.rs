//! Titan streaming adapter
//!
//! Opens a WebSocket session, issues a single `NewSwapQuoteStream` request and
//! forwards every `StreamData` update as one batch. Each update maps the name of
//! an underlying venue to its route; venues are visited in name order so a batch
//! is reproducible for identical input.
//!
//! Addresses and instruction data arrive as raw byte arrays and instruction
//! fields use short names (`p`, `a`, `s`, `w`, `d`).
//!
//! Closing the [`RouteStream`] makes the background task send `StopStream` and a
//! normal close frame.
//!
//! Frames are JSON text. Titan's hosted v1 gateway speaks the same message
//! vocabulary over MessagePack binary frames, so pointing this adapter at it
//! directly needs a JSON bridge in front.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ensure_routable, ProviderError, QuoteProvider, QuoteRoute};
use crate::canonical::{
    address_from_bytes, AccountRef, CanonicalInstruction, MalformedInstruction, ToCanonical,
};
use crate::config::TitanConfig;
use crate::streaming::websocket_stream::{redact_url, WsError, WsJsonSession};
use crate::streaming::{RouteSink, RouteStream, DEFAULT_STREAM_CAPACITY};
use crate::types::{QuoteRequest, SwapMode};

pub const PROVIDER_NAME: &str = "titan";

const QUOTE_REQUEST_ID: u32 = 1;
const STOP_REQUEST_ID: u32 = 2;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ClientRequest {
    id: u32,
    data: RequestData,
}

#[derive(Debug, Serialize)]
enum RequestData {
    NewSwapQuoteStream(SwapQuoteRequest),
    StopStream { id: u32 },
}

#[derive(Debug, Serialize)]
struct SwapQuoteRequest {
    swap: SwapParams,
    transaction: TransactionParams,
    update: UpdateParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapParams {
    input_mint: Vec<u8>,
    output_mint: Vec<u8>,
    amount: u64,
    swap_mode: SwapMode,
    slippage_bps: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionParams {
    user_public_key: Vec<u8>,
    create_output_token_account: bool,
}

#[derive(Debug, Serialize)]
struct UpdateParams {
    num_quotes: u32,
}

#[derive(Debug, Deserialize)]
enum ServerMessage {
    Response(ResponseSuccess),
    Error(ResponseError),
    StreamData(StreamData),
    StreamEnd(StreamEnd),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseSuccess {
    request_id: u32,
    #[serde(default)]
    stream: Option<StreamInfo>,
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
    id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseError {
    request_id: u32,
    #[serde(default)]
    code: Option<u32>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamData {
    id: u32,
    seq: u64,
    payload: StreamPayload,
}

#[derive(Debug, Deserialize)]
enum StreamPayload {
    SwapQuotes(SwapQuotes),
}

#[derive(Debug, Deserialize)]
struct SwapQuotes {
    quotes: BTreeMap<String, TitanSwapRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEnd {
    id: u32,
    #[serde(default)]
    error_message: Option<String>,
}

/// One venue's route inside a Titan update
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitanSwapRoute {
    pub in_amount: u64,
    pub out_amount: u64,
    pub slippage_bps: u16,
    #[serde(default)]
    pub instructions: Vec<TitanInstruction>,
    #[serde(default)]
    pub address_lookup_tables: Vec<Vec<u8>>,
    #[serde(default)]
    pub compute_units: Option<u64>,
    #[serde(default)]
    pub compute_units_safe: Option<u64>,
    #[serde(default)]
    pub transaction: Option<Vec<u8>>,
}

/// Instruction with raw byte addresses
#[derive(Debug, Clone, Deserialize)]
pub struct TitanInstruction {
    pub p: Vec<u8>,
    pub a: Vec<TitanAccount>,
    pub d: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TitanAccount {
    pub p: Vec<u8>,
    pub s: Option<bool>,
    pub w: Option<bool>,
}

impl ToCanonical for TitanInstruction {
    fn to_canonical(&self) -> Result<CanonicalInstruction, MalformedInstruction> {
        let program_id = address_from_bytes(&self.p).map_err(MalformedInstruction::ProgramId)?;
        let accounts = self
            .a
            .iter()
            .enumerate()
            .map(|(index, account)| {
                let address = address_from_bytes(&account.p)
                    .map_err(|reason| MalformedInstruction::Account { index, reason })?;
                let is_signer = account
                    .s
                    .ok_or(MalformedInstruction::MissingFlag { index, flag: "s" })?;
                let is_writable = account
                    .w
                    .ok_or(MalformedInstruction::MissingFlag { index, flag: "w" })?;
                Ok(AccountRef::new(address, is_signer, is_writable))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CanonicalInstruction::new(program_id, accounts, self.d.clone()))
    }
}

impl TitanSwapRoute {
    /// Convert to a canonical route for `request`
    ///
    /// A route that only ships a pre-built transaction cannot be re-signed
    /// through the wallet and is rejected.
    pub fn into_quote_route(
        self,
        venue: &str,
        request: &QuoteRequest,
    ) -> Result<QuoteRoute, ProviderError> {
        if self.instructions.is_empty() {
            return Err(if self.transaction.is_some() {
                ProviderError::IncompatibleRoute(format!(
                    "{} returned a transaction instead of instructions",
                    venue
                ))
            } else {
                ProviderError::IncompatibleRoute(format!("{} returned no instructions", venue))
            });
        }

        let instructions = self
            .instructions
            .iter()
            .map(|ix| ix.to_canonical())
            .collect::<Result<Vec<_>, _>>()?;
        let lookup_tables = self
            .address_lookup_tables
            .iter()
            .map(|bytes| address_from_bytes(bytes).map_err(ProviderError::Protocol))
            .collect::<Result<Vec<_>, _>>()?;
        let estimate = self
            .compute_units_safe
            .or(self.compute_units)
            .map(|units| units.min(u32::MAX as u64) as u32);

        Ok(QuoteRoute::builder(format!("{}/{}", PROVIDER_NAME, venue), request)
            .amounts(self.in_amount, self.out_amount)
            .slippage_bps(self.slippage_bps)
            .compute_units(estimate)
            .instructions(instructions)
            .lookup_tables(lookup_tables)
            .build())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Titan WebSocket quote provider
pub struct TitanProvider {
    config: TitanConfig,
}

impl TitanProvider {
    pub fn new(config: TitanConfig) -> Self {
        Self { config }
    }

    fn connect_url(&self) -> String {
        match &self.config.api_token {
            Some(token) if !token.is_empty() => format!("{}?auth={}", self.config.ws_url, token),
            _ => self.config.ws_url.clone(),
        }
    }

    fn quote_request(&self, request: &QuoteRequest) -> ClientRequest {
        ClientRequest {
            id: QUOTE_REQUEST_ID,
            data: RequestData::NewSwapQuoteStream(SwapQuoteRequest {
                swap: SwapParams {
                    input_mint: request.input_mint.to_bytes().to_vec(),
                    output_mint: request.output_mint.to_bytes().to_vec(),
                    amount: request.amount,
                    swap_mode: request.mode,
                    slippage_bps: request.max_slippage_bps,
                },
                transaction: TransactionParams {
                    user_public_key: request.user.to_bytes().to_vec(),
                    create_output_token_account: self.config.create_output_token_account,
                },
                update: UpdateParams {
                    num_quotes: self.config.num_quotes,
                },
            }),
        }
    }

    /// Connect, send the quote request and wait for the stream id
    async fn open(&self, request: &QuoteRequest) -> Result<(WsJsonSession, u32), ProviderError> {
        let url = self.connect_url();
        let mut session = WsJsonSession::connect(&url, &redact_url(&url))
            .await
            .map_err(ws_error)?;
        session
            .send_json(&self.quote_request(request))
            .await
            .map_err(ws_error)?;

        loop {
            match session.next_json::<ServerMessage>().await {
                Some(Ok(ServerMessage::Response(response)))
                    if response.request_id == QUOTE_REQUEST_ID =>
                {
                    let stream = response.stream.ok_or_else(|| {
                        ProviderError::Protocol("quote response without stream id".into())
                    })?;
                    return Ok((session, stream.id));
                }
                Some(Ok(ServerMessage::Error(error))) if error.request_id == QUOTE_REQUEST_ID => {
                    session.close().await;
                    return Err(ProviderError::Stream(format!(
                        "request rejected (code {}): {}",
                        error.code.unwrap_or_default(),
                        error.message
                    )));
                }
                Some(Ok(other)) => {
                    debug!(target: "providers", provider = PROVIDER_NAME, ?other, "ignoring message before stream start");
                }
                Some(Err(e)) => {
                    session.close().await;
                    return Err(ws_error(e));
                }
                None => {
                    return Err(ProviderError::Transport(
                        "connection closed before quote stream started".into(),
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl QuoteProvider for TitanProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn get_routes(&self, request: &QuoteRequest) -> Result<RouteStream, ProviderError> {
        ensure_routable(request)?;

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let (session, stream_id) = tokio::time::timeout(timeout, self.open(request))
            .await
            .map_err(|_| ProviderError::Transport(format!("no stream after {:?}", timeout)))??;

        info!(target: "providers", provider = PROVIDER_NAME, stream_id, "✓ Titan quote stream opened");

        let (sink, stream) = RouteStream::channel(PROVIDER_NAME, DEFAULT_STREAM_CAPACITY);
        tokio::spawn(pump_stream(session, stream_id, request.clone(), sink));
        Ok(stream)
    }
}

/// Forward stream updates until the server ends the stream or the consumer closes
async fn pump_stream(
    mut session: WsJsonSession,
    stream_id: u32,
    request: QuoteRequest,
    sink: RouteSink,
) {
    loop {
        let message = tokio::select! {
            _ = sink.closed() => None,
            message = session.next_json::<ServerMessage>() => Some(message),
        };
        let Some(message) = message else {
            stop_stream(&mut session, stream_id).await;
            return;
        };

        match message {
            Some(Ok(ServerMessage::StreamData(data))) if data.id == stream_id => {
                let StreamPayload::SwapQuotes(quotes) = data.payload;
                let batch = convert_batch(quotes, &request);
                debug!(target: "providers", provider = PROVIDER_NAME, seq = data.seq, routes = batch.len(), "quote update");
                if batch.is_empty() {
                    continue;
                }
                if !sink.send(Ok(batch)).await {
                    stop_stream(&mut session, stream_id).await;
                    return;
                }
            }
            Some(Ok(ServerMessage::StreamEnd(end))) if end.id == stream_id => {
                if let Some(message) = end.error_message {
                    let _ = sink.send(Err(ProviderError::Stream(message))).await;
                }
                session.close().await;
                return;
            }
            Some(Ok(ServerMessage::Error(error))) => {
                let _ = sink.send(Err(ProviderError::Stream(error.message))).await;
                session.close().await;
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let _ = sink.send(Err(ws_error(e))).await;
                session.close().await;
                return;
            }
            None => return,
        }
    }
}

async fn stop_stream(session: &mut WsJsonSession, stream_id: u32) {
    let stop = ClientRequest {
        id: STOP_REQUEST_ID,
        data: RequestData::StopStream { id: stream_id },
    };
    if let Err(e) = session.send_json(&stop).await {
        debug!(target: "providers", provider = PROVIDER_NAME, error = %e, "StopStream not delivered");
    }
    session.close().await;
}

fn convert_batch(quotes: SwapQuotes, request: &QuoteRequest) -> Vec<QuoteRoute> {
    quotes
        .quotes
        .into_iter()
        .filter_map(|(venue, route)| match route.into_quote_route(&venue, request) {
            Ok(route) => Some(route),
            Err(e) => {
                warn!(target: "providers", provider = PROVIDER_NAME, venue = %venue, error = %e, "dropping route");
                None
            }
        })
        .collect()
}

fn ws_error(e: WsError) -> ProviderError {
    match e {
        WsError::Connect { .. } | WsError::Transport(_) => ProviderError::Transport(e.to_string()),
        WsError::Decode(_) | WsError::Encode(_) => ProviderError::Protocol(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{USDC_MINT, WSOL_MINT};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use solana_sdk::pubkey::Pubkey;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn request() -> QuoteRequest {
        QuoteRequest {
            input_mint: WSOL_MINT,
            output_mint: USDC_MINT,
            amount: 5_000,
            mode: SwapMode::ExactIn,
            max_slippage_bps: 50,
            slippage_jitter_bps: 0,
            user: Pubkey::new_unique(),
        }
    }

    fn route_json(out_amount: u64, program: Pubkey) -> serde_json::Value {
        json!({
            "inAmount": 5_000,
            "outAmount": out_amount,
            "slippageBps": 50,
            "instructions": [{
                "p": program.to_bytes().to_vec(),
                "a": [{"p": Pubkey::new_unique().to_bytes().to_vec(), "s": false, "w": true}],
                "d": [7, 7]
            }],
            "addressLookupTables": [],
            "computeUnits": 120_000,
            "computeUnitsSafe": 150_000
        })
    }

    fn stream_data(seq: u64, quotes: serde_json::Value) -> Message {
        Message::Text(
            json!({"StreamData": {"id": 9, "seq": seq, "payload": {"SwapQuotes": {"quotes": quotes}}}})
                .to_string(),
        )
    }

    /// Serve one connection; report every client text frame on `seen`
    async fn spawn_server(
        frames: Vec<Message>,
        hold_open: bool,
    ) -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = seen_tx.send(serde_json::from_str(&text).unwrap());
            }
            ws.send(Message::Text(
                json!({"Response": {"requestId": 1, "stream": {"id": 9}}}).to_string(),
            ))
            .await
            .unwrap();

            for frame in frames {
                if ws.send(frame).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if !hold_open {
                let _ = ws
                    .send(Message::Text(json!({"StreamEnd": {"id": 9}}).to_string()))
                    .await;
            }
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = seen_tx.send(serde_json::from_str(&text).unwrap());
                }
            }
        });

        (format!("ws://{}", addr), seen_rx)
    }

    fn provider(url: String) -> TitanProvider {
        TitanProvider::new(TitanConfig {
            ws_url: url,
            api_token: None,
            ..TitanConfig::default()
        })
    }

    #[tokio::test]
    async fn test_stream_yields_batches_in_order_then_ends() {
        let program = Pubkey::new_unique();
        let frames = vec![
            stream_data(0, json!({"venueB": route_json(900, program), "venueA": route_json(950, program)})),
            stream_data(1, json!({"venueA": route_json(1_100, program)})),
        ];
        let (url, mut seen) = spawn_server(frames, false).await;

        let mut stream = provider(url).get_routes(&request()).await.unwrap();

        let first = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        // venues visited in name order
        assert_eq!(first[0].provider(), "titan/venueA");
        assert_eq!(first[0].out_amount(), 950);
        assert_eq!(first[0].compute_units_estimate(), Some(150_000));
        assert_eq!(first[1].provider(), "titan/venueB");

        let second = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(second[0].out_amount(), 1_100);

        assert!(stream.next_batch().await.is_none());
        stream.close();

        let sent = seen.recv().await.unwrap();
        let swap = &sent["data"]["NewSwapQuoteStream"]["swap"];
        assert_eq!(swap["amount"], 5_000);
        assert_eq!(swap["slippageBps"], 50);
        assert_eq!(swap["swapMode"], "ExactIn");
        assert_eq!(swap["inputMint"].as_array().unwrap().len(), 32);
        assert_eq!(sent["data"]["NewSwapQuoteStream"]["update"]["num_quotes"], 3);
    }

    #[tokio::test]
    async fn test_close_sends_stop_stream() {
        let program = Pubkey::new_unique();
        let frames = vec![stream_data(0, json!({"venueA": route_json(900, program)}))];
        let (url, mut seen) = spawn_server(frames, true).await;

        let mut stream = provider(url).get_routes(&request()).await.unwrap();
        let batch = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);

        stream.close();
        stream.close();

        let _quote_request = seen.recv().await.unwrap();
        let stop = tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stop["data"]["StopStream"]["id"], 9);
    }

    #[tokio::test]
    async fn test_transaction_only_route_is_dropped() {
        let program = Pubkey::new_unique();
        let frames = vec![stream_data(
            0,
            json!({
                "prebuilt": {"inAmount": 5_000, "outAmount": 2_000, "slippageBps": 50, "transaction": [1, 2, 3]},
                "venueA": route_json(900, program)
            }),
        )];
        let (url, _seen) = spawn_server(frames, false).await;

        let mut stream = provider(url).get_routes(&request()).await.unwrap();
        let batch = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].out_amount(), 900);
    }

    #[tokio::test]
    async fn test_streamed_instruction_wire_bytes_fold_repeated_accounts() {
        let program = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let vault = Pubkey::new_unique();
        let data = vec![3u8, 1, 4, 1, 5];
        let route = json!({
            "inAmount": 5_000,
            "outAmount": 1_000,
            "slippageBps": 50,
            "instructions": [{
                "p": program.to_bytes().to_vec(),
                "a": [
                    {"p": vault.to_bytes().to_vec(), "s": false, "w": true},
                    {"p": user.to_bytes().to_vec(), "s": true, "w": false},
                    {"p": vault.to_bytes().to_vec(), "s": false, "w": false},
                    {"p": user.to_bytes().to_vec(), "s": false, "w": true}
                ],
                "d": data.clone()
            }]
        });
        let (url, _seen) = spawn_server(vec![stream_data(0, json!({"venueA": route}))], false).await;

        let mut stream = provider(url).get_routes(&request()).await.unwrap();
        let batch = stream.next_batch().await.unwrap().unwrap();
        let ix = &batch[0].instructions()[0];
        assert_eq!(ix.accounts().len(), 4);

        let mut expected = program.to_bytes().to_vec();
        expected.extend_from_slice(&2u16.to_le_bytes());
        expected.extend_from_slice(vault.as_ref());
        expected.push(0b10);
        expected.extend_from_slice(user.as_ref());
        expected.push(0b11);
        expected.extend_from_slice(&(data.len() as u32).to_le_bytes());
        expected.extend_from_slice(&data);
        assert_eq!(ix.wire_bytes(), expected);
    }

    #[test]
    fn test_transaction_only_route_is_incompatible() {
        let route = TitanSwapRoute {
            in_amount: 1,
            out_amount: 2,
            slippage_bps: 50,
            instructions: vec![],
            address_lookup_tables: vec![],
            compute_units: None,
            compute_units_safe: None,
            transaction: Some(vec![0u8; 10]),
        };
        assert!(matches!(
            route.into_quote_route("venue", &request()),
            Err(ProviderError::IncompatibleRoute(_))
        ));
    }

    #[test]
    fn test_short_address_is_malformed() {
        let ix = TitanInstruction {
            p: vec![1u8; 32],
            a: vec![TitanAccount {
                p: vec![2u8; 31],
                s: Some(false),
                w: Some(true),
            }],
            d: vec![],
        };
        assert!(matches!(
            ix.to_canonical(),
            Err(MalformedInstruction::Account { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected_before_connect() {
        let mut req = request();
        req.amount = 0;
        let result = provider("ws://127.0.0.1:1".into()).get_routes(&req).await;
        assert!(matches!(result, Err(ProviderError::NoRoute(_))));
    }
}

//! Jupiter Metis HTTP adapter
//!
//! Request/response provider: `GET /quote` followed by `POST /swap-instructions`.
//! The resulting stream carries exactly one batch holding one route.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{ensure_routable, jittered_slippage_bps, ProviderError, QuoteProvider, QuoteRoute};
use crate::canonical::{
    address_from_str, AccountRef, CanonicalInstruction, MalformedInstruction, ToCanonical,
};
use crate::config::MetisConfig;
use crate::streaming::RouteStream;
use crate::types::QuoteRequest;

pub const PROVIDER_NAME: &str = "metis";

/// Quote summary returned by `GET /quote`
///
/// The full JSON body is kept verbatim because `/swap-instructions` expects it
/// back unchanged.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummary {
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: String,
    #[serde(default)]
    swap_mode: Option<String>,
    #[serde(default)]
    slippage_bps: Option<u16>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapInstructionsRequest<'a> {
    quote_response: &'a Value,
    user_public_key: String,
    wrap_and_unwrap_sol: bool,
    use_shared_accounts: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapInstructionsResponse {
    #[serde(default)]
    compute_budget_instructions: Vec<MetisInstruction>,
    #[serde(default)]
    setup_instructions: Vec<MetisInstruction>,
    swap_instruction: MetisInstruction,
    #[serde(default)]
    address_lookup_table_addresses: Vec<String>,
    #[serde(default)]
    compute_unit_limit: Option<u32>,
}

/// Instruction as Metis encodes it: base58 keys, base64 data
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetisInstruction {
    pub program_id: String,
    pub accounts: Vec<MetisAccount>,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetisAccount {
    pub pubkey: String,
    pub is_signer: Option<bool>,
    pub is_writable: Option<bool>,
}

impl ToCanonical for MetisInstruction {
    fn to_canonical(&self) -> Result<CanonicalInstruction, MalformedInstruction> {
        let program_id =
            address_from_str(&self.program_id).map_err(MalformedInstruction::ProgramId)?;

        let accounts = self
            .accounts
            .iter()
            .enumerate()
            .map(|(index, account)| {
                let address = address_from_str(&account.pubkey)
                    .map_err(|reason| MalformedInstruction::Account { index, reason })?;
                let is_signer = account
                    .is_signer
                    .ok_or(MalformedInstruction::MissingFlag { index, flag: "isSigner" })?;
                let is_writable = account
                    .is_writable
                    .ok_or(MalformedInstruction::MissingFlag { index, flag: "isWritable" })?;
                Ok(AccountRef::new(address, is_signer, is_writable))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let data = BASE64
            .decode(&self.data)
            .map_err(|e| MalformedInstruction::Data(e.to_string()))?;

        Ok(CanonicalInstruction::new(program_id, accounts, data))
    }
}

/// Jupiter Metis quote provider
pub struct MetisProvider {
    config: MetisConfig,
    http: reqwest::Client,
}

impl MetisProvider {
    pub fn new(config: MetisConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn with_api_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => builder.header("x-api-key", key),
            _ => builder,
        }
    }

    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<Value, ProviderError> {
        let slippage_bps =
            jittered_slippage_bps(request.max_slippage_bps, request.slippage_jitter_bps);
        let query = [
            ("inputMint", request.input_mint.to_string()),
            ("outputMint", request.output_mint.to_string()),
            ("amount", request.amount.to_string()),
            ("swapMode", request.mode.as_str().to_string()),
            ("slippageBps", slippage_bps.to_string()),
            ("maxAccounts", self.config.max_accounts.to_string()),
        ];
        debug!(target: "providers", provider = PROVIDER_NAME, slippage_bps, "requesting quote");

        let response = self
            .with_api_key(self.http.get(self.endpoint("quote")).query(&query))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status == StatusCode::BAD_REQUEST {
                ProviderError::NoRoute(error_message(&body))
            } else {
                ProviderError::Http {
                    status: status.as_u16(),
                    message: error_message(&body),
                }
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Protocol(format!("quote body: {}", e)))
    }

    async fn fetch_swap_instructions(
        &self,
        quote: &Value,
        request: &QuoteRequest,
    ) -> Result<SwapInstructionsResponse, ProviderError> {
        let body = SwapInstructionsRequest {
            quote_response: quote,
            user_public_key: request.user.to_string(),
            wrap_and_unwrap_sol: self.config.wrap_and_unwrap_sol,
            use_shared_accounts: self.config.use_shared_accounts,
        };

        let response = self
            .with_api_key(self.http.post(self.endpoint("swap-instructions")).json(&body))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Metis answers 400 once the quote it is handed has gone stale
            return Err(if status == StatusCode::BAD_REQUEST {
                ProviderError::QuoteExpired(error_message(&body))
            } else {
                ProviderError::Http {
                    status: status.as_u16(),
                    message: error_message(&body),
                }
            });
        }

        response
            .json::<SwapInstructionsResponse>()
            .await
            .map_err(|e| ProviderError::Protocol(format!("swap-instructions body: {}", e)))
    }

    fn build_route(
        &self,
        request: &QuoteRequest,
        summary: QuoteSummary,
        swap: SwapInstructionsResponse,
    ) -> Result<QuoteRoute, ProviderError> {
        let in_amount = parse_amount("inAmount", &summary.in_amount)?;
        let out_amount = parse_amount("outAmount", &summary.out_amount)?;
        let input_mint = address_from_str(&summary.input_mint).map_err(ProviderError::Protocol)?;
        let output_mint =
            address_from_str(&summary.output_mint).map_err(ProviderError::Protocol)?;
        let swap_mode = match summary.swap_mode.as_deref() {
            Some("ExactOut") => crate::types::SwapMode::ExactOut,
            _ => crate::types::SwapMode::ExactIn,
        };

        let instructions = swap
            .compute_budget_instructions
            .iter()
            .chain(swap.setup_instructions.iter())
            .chain(std::iter::once(&swap.swap_instruction))
            .map(|ix| ix.to_canonical())
            .collect::<Result<Vec<_>, _>>()?;

        let lookup_tables = swap
            .address_lookup_table_addresses
            .iter()
            .map(|addr| address_from_str(addr).map_err(ProviderError::Protocol))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QuoteRoute::builder(PROVIDER_NAME, request)
            .mints(input_mint, output_mint)
            .swap_mode(swap_mode)
            .amounts(in_amount, out_amount)
            .slippage_bps(summary.slippage_bps.unwrap_or(request.max_slippage_bps))
            .compute_units(swap.compute_unit_limit)
            .instructions(instructions)
            .lookup_tables(lookup_tables)
            .build())
    }
}

#[async_trait]
impl QuoteProvider for MetisProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn get_routes(&self, request: &QuoteRequest) -> Result<RouteStream, ProviderError> {
        ensure_routable(request)?;

        let quote = self.fetch_quote(request).await?;
        let summary: QuoteSummary = serde_json::from_value(quote.clone())
            .map_err(|e| ProviderError::Protocol(format!("quote fields: {}", e)))?;
        let swap = self.fetch_swap_instructions(&quote, request).await?;
        let route = self.build_route(request, summary, swap)?;

        info!(
            target: "providers",
            provider = PROVIDER_NAME,
            in_amount = route.in_amount(),
            out_amount = route.out_amount(),
            instructions = route.instructions().len(),
            lookup_tables = route.lookup_tables().len(),
            "📊 Quote received"
        );

        Ok(RouteStream::once(PROVIDER_NAME, vec![route]))
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    ProviderError::Transport(e.to_string())
}

fn parse_amount(field: &str, value: &str) -> Result<u64, ProviderError> {
    value
        .parse::<u64>()
        .map_err(|_| ProviderError::Protocol(format!("{} is not an integer: {}", field, value)))
}

/// Pull `error` out of a JSON error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

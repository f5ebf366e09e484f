//! Aggregator races against the real Metis adapter
//!
//! Metis runs over a mockito HTTP server; the streaming side is scripted.
//! Covers provider outages mid-race and the stop rule across adapter kinds.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use mockito::Matcher;
use solana_sdk::pubkey::Pubkey;

use crate::aggregator::{race_routes, AggregatorError, BatchTarget, RacePolicy};
use crate::config::MetisConfig;
use crate::providers::metis::MetisProvider;
use crate::providers::ProviderError;
use crate::test_utils::{sample_request, sample_route, ScriptedProvider};
use crate::types::{QuoteRequest, USDC_MINT, WSOL_MINT};

async fn metis_server(out_amount: u64, swap_status: usize) -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    let quote = serde_json::json!({
        "inputMint": WSOL_MINT.to_string(),
        "outputMint": USDC_MINT.to_string(),
        "inAmount": "100000000",
        "outAmount": out_amount.to_string(),
        "otherAmountThreshold": "0",
        "swapMode": "ExactIn",
        "slippageBps": 50,
        "routePlan": []
    });
    server
        .mock("GET", "/quote")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(quote.to_string())
        .create_async()
        .await;

    let swap = serde_json::json!({
        "computeBudgetInstructions": [],
        "setupInstructions": [],
        "swapInstruction": {
            "programId": Pubkey::new_unique().to_string(),
            "accounts": [{"pubkey": Pubkey::new_unique().to_string(), "isSigner": false, "isWritable": true}],
            "data": BASE64.encode([9u8, 9]),
        },
        "addressLookupTableAddresses": [],
    });
    let body = if swap_status == 200 {
        swap.to_string()
    } else {
        r#"{"error":"quote expired"}"#.to_string()
    };
    server
        .mock("POST", "/swap-instructions")
        .with_status(swap_status)
        .with_body(body)
        .create_async()
        .await;
    server
}

fn metis(server: &mockito::ServerGuard) -> MetisProvider {
    MetisProvider::new(MetisConfig {
        base_url: server.url(),
        ..MetisConfig::default()
    })
    .unwrap()
}

fn streaming(req: &QuoteRequest, second_delay: Duration) -> ScriptedProvider {
    ScriptedProvider::new(
        "titan",
        vec![
            (Duration::from_millis(0), vec![sample_route("titan", req, 150_000)]),
            (second_delay, vec![sample_route("titan", req, 160_000)]),
        ],
    )
}

#[tokio::test]
async fn test_min_batches_prefers_first_answers() {
    let server = metis_server(153_200, 200).await;
    let req = sample_request();
    let metis = metis(&server);
    let titan = streaming(&req, Duration::from_secs(5));

    let best = race_routes(&[&metis, &titan], &req, &RacePolicy::default())
        .await
        .unwrap();

    assert_eq!(best.provider(), "metis");
    assert_eq!(best.out_amount(), 153_200);
    titan.wait_closed(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_until_closed_sees_stream_improvement() {
    let server = metis_server(153_200, 200).await;
    let req = sample_request();
    let metis = metis(&server);
    let titan = streaming(&req, Duration::from_millis(100));

    let policy = RacePolicy {
        batch_target: BatchTarget::UntilClosed,
        ..RacePolicy::default()
    };
    let best = race_routes(&[&metis, &titan], &req, &policy).await.unwrap();

    assert_eq!(best.provider(), "titan");
    assert_eq!(best.out_amount(), 160_000);
}

#[tokio::test]
async fn test_expired_quote_does_not_sink_race() {
    let server = metis_server(999_999, 400).await;
    let req = sample_request();
    let metis = metis(&server);
    let titan = streaming(&req, Duration::from_millis(10));

    let policy = RacePolicy {
        batch_target: BatchTarget::UntilClosed,
        ..RacePolicy::default()
    };
    let best = race_routes(&[&metis, &titan], &req, &policy).await.unwrap();
    assert_eq!(best.provider(), "titan");
}

#[tokio::test]
async fn test_all_providers_failing_is_retryable_when_quotes_expire() {
    let server = metis_server(1, 400).await;
    let req = sample_request();
    let metis = metis(&server);

    let err = race_routes(&[&metis], &req, &RacePolicy::default())
        .await
        .unwrap_err();

    match &err {
        AggregatorError::NoQuoteAvailable { errors, .. } => {
            assert_eq!(errors.len(), 1);
            assert!(matches!(errors[0].1, ProviderError::QuoteExpired(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

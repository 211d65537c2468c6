//! Read-only JSON-RPC ledger client
//!
//! Speaks the two calls the reconstructor needs: `getProgramAccounts` with a
//! `dataSize` filter and `getAccountInfo`. Account data always travels as
//! base64. A scan drops individual accounts it cannot decode rather than
//! failing the whole listing.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use shade_core::config::LedgerConfig;
use shade_core::{Address, ShadeError, ShadeResult};
use tracing::{debug, trace};

use crate::ledger::{LedgerError, LedgerReader, RawAccount};

#[derive(Clone)]
pub struct RpcLedger {
    url: String,
    program_id: Address,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct KeyedAccount {
    pubkey: String,
    account: AccountBody,
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    /// `[payload, encoding]`
    data: (String, String),
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    value: Option<AccountBody>,
}

impl RpcLedger {
    pub fn new(
        url: impl Into<String>,
        program_id: Address,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            program_id,
            timeout,
            client,
        })
    }

    pub fn from_config(config: &LedgerConfig) -> ShadeResult<Self> {
        let program_id = config.program_address()?;
        Self::new(
            config.rpc_url.clone(),
            program_id,
            Duration::from_secs(config.request_timeout_secs),
        )
        .map_err(ShadeError::from)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        trace!(method, url = %self.url, "rpc request");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(LedgerError::Transport(format!("http status {status}")));
        }
        if !status.is_success() {
            return Err(LedgerError::Rejected(format!(
                "http status {status} body={:?}",
                resp.text().await.ok()
            )));
        }

        let text = resp.text().await.map_err(|e| self.transport_error(e))?;
        parse_response(&text)
    }

    fn transport_error(&self, e: reqwest::Error) -> LedgerError {
        if e.is_timeout() {
            LedgerError::Timeout(self.timeout)
        } else {
            LedgerError::Transport(e.to_string())
        }
    }
}

fn parse_response<T: DeserializeOwned>(text: &str) -> Result<Option<T>, LedgerError> {
    let parsed: RpcResponse<T> = serde_json::from_str(text)
        .map_err(|e| LedgerError::Transport(format!("malformed rpc response: {e}")))?;
    if let Some(err) = parsed.error {
        return Err(LedgerError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    Ok(parsed.result)
}

fn decode_data(body: &AccountBody) -> Result<Vec<u8>, LedgerError> {
    let (payload, encoding) = &body.data;
    if encoding != "base64" {
        return Err(LedgerError::Rejected(format!(
            "unexpected account encoding {encoding}"
        )));
    }
    BASE64
        .decode(payload)
        .map_err(|e| LedgerError::Rejected(format!("bad base64 account data: {e}")))
}

fn decode_keyed(keyed: serde_json::Value) -> Result<RawAccount, LedgerError> {
    let keyed: KeyedAccount = serde_json::from_value(keyed)
        .map_err(|e| LedgerError::Rejected(format!("malformed program account: {e}")))?;
    let address = keyed
        .pubkey
        .parse()
        .map_err(|e| LedgerError::Rejected(format!("bad account key: {e}")))?;
    Ok(RawAccount {
        address,
        data: decode_data(&keyed.account)?,
    })
}

/// Decode every listed account, skipping the ones that fail.
fn decode_listing(accounts: Vec<serde_json::Value>) -> (Vec<RawAccount>, usize) {
    let mut skipped = 0;
    let decoded = accounts
        .into_iter()
        .filter_map(|keyed| match decode_keyed(keyed) {
            Ok(raw) => Some(raw),
            Err(e) => {
                debug!(error = %e, "skipping undecodable program account");
                skipped += 1;
                None
            }
        })
        .collect();
    (decoded, skipped)
}

#[async_trait]
impl LedgerReader for RpcLedger {
    async fn scan_accounts_by_size(&self, size: usize) -> Result<Vec<RawAccount>, LedgerError> {
        let params = json!([
            self.program_id.to_base58(),
            { "encoding": "base64", "filters": [{ "dataSize": size }] },
        ]);
        let accounts: Vec<serde_json::Value> = self
            .call("getProgramAccounts", params)
            .await?
            .unwrap_or_default();
        let (decoded, skipped) = decode_listing(accounts);
        debug!(size, count = decoded.len(), skipped, "program accounts fetched");
        Ok(decoded)
    }

    async fn get_account(&self, address: &Address) -> Result<Option<Vec<u8>>, LedgerError> {
        let params = json!([address.to_base58(), { "encoding": "base64" }]);
        let info: Option<AccountInfo> = self.call("getAccountInfo", params).await?;
        match info.and_then(|i| i.value) {
            Some(body) => decode_data(&body).map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedger")
            .field("url", &self.url)
            .field("program_id", &self.program_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_accounts() {
        let addr = Address::new([3u8; 32]);
        let text = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [{
                "pubkey": addr.to_base58(),
                "account": {
                    "data": [BASE64.encode([1u8, 2, 3]), "base64"],
                    "lamports": 1,
                    "owner": "11111111111111111111111111111111",
                },
            }],
        })
        .to_string();

        let accounts: Vec<serde_json::Value> = parse_response(&text).unwrap().unwrap();
        let (raw, skipped) = decode_listing(accounts);
        assert_eq!((raw.len(), skipped), (1, 0));
        assert_eq!(raw[0].address, addr);
        assert_eq!(raw[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn test_bad_accounts_skipped_in_listing() {
        let good = Address::new([3u8; 32]);
        let text = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [
                {
                    "pubkey": good.to_base58(),
                    "account": { "data": [BASE64.encode([7u8; 4]), "base64"] },
                },
                {
                    "pubkey": Address::new([4u8; 32]).to_base58(),
                    "account": { "data": ["!!notbase64", "base64"] },
                },
                {
                    "pubkey": "not-a-key",
                    "account": { "data": [BASE64.encode([1u8]), "base64"] },
                },
                { "pubkey": good.to_base58(), "account": { "data": 42 } },
            ],
        })
        .to_string();

        let accounts: Vec<serde_json::Value> = parse_response(&text).unwrap().unwrap();
        let (raw, skipped) = decode_listing(accounts);
        assert_eq!(skipped, 3);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].address, good);
        assert_eq!(raw[0].data, vec![7u8; 4]);
    }

    #[test]
    fn test_parse_missing_account() {
        let text = r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":5},"value":null}}"#;
        let info: AccountInfo = parse_response(text).unwrap().unwrap();
        assert!(info.value.is_none());
    }

    #[test]
    fn test_rpc_error_classified() {
        let text = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"node is behind"}}"#;
        let err = parse_response::<AccountInfo>(text).unwrap_err();
        assert!(err.is_transient());

        let text = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"invalid params"}}"#;
        let err = parse_response::<AccountInfo>(text).unwrap_err();
        assert!(matches!(err, LedgerError::Rpc { code: -32602, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rejects_other_encodings() {
        let body = AccountBody {
            data: ("AAAA".into(), "base58".into()),
        };
        assert!(matches!(decode_data(&body), Err(LedgerError::Rejected(_))));
    }

    #[test]
    fn test_from_config() {
        let ledger = RpcLedger::from_config(&LedgerConfig::default()).unwrap();
        assert!(!ledger.url().ends_with('/'));
    }
}

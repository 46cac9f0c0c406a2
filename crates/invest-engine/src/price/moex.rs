//! MOEX ISS Client
//!
//! Reads the TQBR board of the Moscow Exchange. The ISS answers with two
//! column-oriented tables, `securities` and `marketdata`, whose rows are
//! aligned by position. Both tables are decoded against a fixed column set;
//! any column we did not ask for is treated as a malformed payload.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use super::PriceSource;
use crate::config::MoexConfig;
use crate::error::{InvestError, Result};
use crate::model::StockInfo;

const SECURITIES_PATH: &str = "/iss/engines/stock/markets/shares/boards/TQBR/securities.json";
const SECURITIES_COLUMNS: &str = "SECID,SHORTNAME,LOTSIZE,CURRENCYID,STATUS";
const MARKETDATA_COLUMNS: &str = "SECID,LAST";

#[derive(Debug, Deserialize)]
struct IssResponse {
    securities: IssTable<SecurityColumn>,
    marketdata: IssTable<MarketColumn>,
}

#[derive(Debug, Deserialize)]
struct IssTable<C> {
    columns: Vec<C>,
    data: Vec<Vec<Value>>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum SecurityColumn {
    SecId,
    ShortName,
    LotSize,
    CurrencyId,
    Status,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum MarketColumn {
    SecId,
    Last,
}

/// HTTP client for the MOEX Informational & Statistical Server
pub struct MoexClient {
    http: reqwest::Client,
    base_url: String,
}

impl MoexClient {
    pub fn new(config: &MoexConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, tickers: &[String]) -> Result<Vec<StockInfo>> {
        let url = format!("{}{SECURITIES_PATH}", self.base_url);
        let mut params = vec![
            ("iss.meta", "off".to_string()),
            ("securities.columns", SECURITIES_COLUMNS.to_string()),
            ("marketdata.columns", MARKETDATA_COLUMNS.to_string()),
        ];
        if !tickers.is_empty() {
            params.push(("securities", tickers.join(",")));
        }

        tracing::debug!(%url, tickers = tickers.len(), "requesting MOEX securities");

        let body = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&params)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                tracing::error!(error = %e, "MOEX request failed");
                InvestError::Network(e)
            })?
            .text()
            .await?;

        let stocks = decode_securities(&body).inspect_err(|e| {
            tracing::error!(error = %e, "can't decode MOEX payload");
        })?;

        tracing::debug!(count = stocks.len(), "MOEX securities decoded");
        Ok(stocks)
    }
}

#[async_trait]
impl PriceSource for MoexClient {
    async fn stock_info(&self, ticker: &str) -> Result<StockInfo> {
        let ticker = ticker.to_uppercase();
        let mut stocks = self.fetch(std::slice::from_ref(&ticker)).await?;

        match stocks.len() {
            0 => Err(InvestError::NotFound(format!("ticker {ticker}"))),
            1 => Ok(stocks.remove(0)),
            n => Err(InvestError::Decode(format!(
                "expected one security for {ticker}, got {n}"
            ))),
        }
    }

    async fn stocks_info(&self, tickers: &[String]) -> Result<HashMap<String, StockInfo>> {
        // An empty filter would return the whole board
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }

        Ok(self
            .fetch(tickers)
            .await?
            .into_iter()
            .map(|s| (s.ticker.clone(), s))
            .collect())
    }

    async fn all_stocks_info(&self) -> Result<Vec<StockInfo>> {
        self.fetch(&[]).await
    }

    fn name(&self) -> &str {
        "MOEX"
    }
}

/// Decode an ISS securities payload into stock infos, row by row
fn decode_securities(body: &str) -> Result<Vec<StockInfo>> {
    let raw: IssResponse =
        serde_json::from_str(body).map_err(|e| InvestError::Decode(e.to_string()))?;

    if raw.securities.data.len() != raw.marketdata.data.len() {
        return Err(InvestError::Decode(format!(
            "{} securities rows but {} marketdata rows",
            raw.securities.data.len(),
            raw.marketdata.data.len()
        )));
    }

    raw.marketdata
        .data
        .iter()
        .zip(&raw.securities.data)
        .map(|(market_row, security_row)| {
            decode_row(
                &raw.marketdata.columns,
                market_row,
                &raw.securities.columns,
                security_row,
            )
        })
        .collect()
}

fn decode_row(
    market_columns: &[MarketColumn],
    market_row: &[Value],
    security_columns: &[SecurityColumn],
    security_row: &[Value],
) -> Result<StockInfo> {
    if market_row.len() != market_columns.len() {
        return Err(InvestError::Decode("marketdata row width mismatch".into()));
    }
    if security_row.len() != security_columns.len() {
        return Err(InvestError::Decode("securities row width mismatch".into()));
    }

    let mut stock = StockInfo {
        ticker: String::new(),
        short_name: String::new(),
        lot_size: 0,
        currency: String::new(),
        active: false,
        price: Decimal::ZERO,
    };

    for (column, value) in market_columns.iter().zip(market_row) {
        match column {
            MarketColumn::SecId => stock.ticker = as_string(value, "SECID")?,
            MarketColumn::Last => {
                if !value.is_null() {
                    stock.price = as_decimal(value, "LAST")?;
                }
            }
        }
    }

    for (column, value) in security_columns.iter().zip(security_row) {
        match column {
            SecurityColumn::SecId => {
                let sec_id = as_string(value, "SECID")?;
                if sec_id != stock.ticker {
                    return Err(InvestError::Decode(format!(
                        "SECID differs between securities ({sec_id}) and marketdata ({})",
                        stock.ticker
                    )));
                }
            }
            SecurityColumn::ShortName => stock.short_name = as_string(value, "SHORTNAME")?,
            SecurityColumn::LotSize => {
                stock.lot_size = value
                    .as_i64()
                    .or_else(|| value.as_f64().map(|f| f as i64))
                    .ok_or_else(|| invalid_type("LOTSIZE", value))?;
            }
            SecurityColumn::CurrencyId => {
                let currency = as_string(value, "CURRENCYID")?;
                stock.currency = if currency == "SUR" { "RUB".into() } else { currency };
            }
            SecurityColumn::Status => stock.active = as_string(value, "STATUS")? == "A",
        }
    }

    Ok(stock)
}

fn as_string(value: &Value, column: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid_type(column, value))
}

fn as_decimal(value: &Value, column: &str) -> Result<Decimal> {
    let Value::Number(n) = value else {
        return Err(invalid_type(column, value));
    };
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| invalid_type(column, value))
}

fn invalid_type(column: &str, value: &Value) -> InvestError {
    InvestError::Decode(format!("invalid type {column} = {value}"))
}

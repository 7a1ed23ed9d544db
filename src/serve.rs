//! Построчный JSON-протокол поверх stdin/stdout.
//!
//! Один запрос на строку, один ответ на строку. Процесс `serve` владеет кэшем
//! сессий всё время своей жизни, так что разблокированная карта остаётся
//! открытой между запросами.

use crate::card::{OtpCard, SlotCodes};
use crate::error::VaultError;
use crate::vault::Vault;
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::{BufRead, Write};
use time::OffsetDateTime;

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    List,
    Get {
        id: String,
    },
    Save {
        #[serde(flatten)]
        card: OtpCard,
    },
    Create {
        name: String,
        password: String,
        codes: Vec<String>,
    },
    Delete {
        id: String,
    },
    Unlock {
        card_id: String,
        password: String,
    },
    Activate {
        card_id: String,
        codes: Vec<String>,
    },
    Code {
        card_id: String,
        index: usize,
    },
    Resolve {
        index: usize,
    },
    Lock,
}

impl Request {
    fn op(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get { .. } => "get",
            Self::Save { .. } => "save",
            Self::Create { .. } => "create",
            Self::Delete { .. } => "delete",
            Self::Unlock { .. } => "unlock",
            Self::Activate { .. } => "activate",
            Self::Code { .. } => "code",
            Self::Resolve { .. } => "resolve",
            Self::Lock => "lock",
        }
    }
}

pub fn handle(vault: &Vault, request: Request, now: OffsetDateTime) -> Result<Value, VaultError> {
    tracing::debug!(op = request.op(), "request");
    match request {
        Request::List => {
            let cards: Vec<Value> = vault
                .list_cards()?
                .into_iter()
                .map(|card| {
                    let unlocked = vault.is_unlocked(&card.id, now);
                    let mut value = json!(card);
                    value["unlocked"] = Value::Bool(unlocked);
                    value
                })
                .collect();
            Ok(json!({ "cards": cards }))
        }
        Request::Get { id } => Ok(json!({ "card": vault.get_card(&id)? })),
        Request::Save { card } => {
            vault.save_card(card)?;
            Ok(json!({}))
        }
        Request::Create {
            name,
            password,
            codes,
        } => {
            let password = zeroize::Zeroizing::new(password);
            let codes = SlotCodes::new(codes).map_err(VaultError::InvalidCodes)?;
            let card = vault.create_card(&name, &password, &codes, now)?;
            Ok(json!({ "card": card }))
        }
        Request::Delete { id } => {
            vault.delete_card(&id)?;
            Ok(json!({}))
        }
        Request::Unlock { card_id, password } => {
            let password = zeroize::Zeroizing::new(password);
            vault.attempt_unlock(&card_id, &password, now)?;
            Ok(json!({}))
        }
        Request::Activate { card_id, codes } => {
            vault.activate_session(&card_id, codes, now)?;
            Ok(json!({}))
        }
        Request::Code { card_id, index } => Ok(json!(vault.request_code(&card_id, index, now)?)),
        Request::Resolve { index } => Ok(json!(vault.resolve(index, now)?)),
        Request::Lock => {
            vault.lock_all();
            Ok(json!({}))
        }
    }
}

fn respond(result: Result<Value, VaultError>) -> Value {
    match result {
        Ok(mut body) => {
            if let Value::Object(map) = &mut body {
                map.insert("ok".to_string(), Value::Bool(true));
            }
            body
        }
        Err(e) => {
            tracing::debug!(error = %e, "request failed");
            json!({ "ok": false, "error": e.kind(), "message": e.to_string() })
        }
    }
}

/// Обрабатывать запросы до EOF. Ошибка запроса не завершает цикл.
pub fn run<R: BufRead, W: Write>(vault: &Vault, input: R, mut output: W) -> anyhow::Result<()> {
    tracing::info!("serving requests on stdin");
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => respond(handle(vault, request, OffsetDateTime::now_utc())),
            Err(e) => {
                tracing::warn!(error = %e, "bad request line");
                json!({ "ok": false, "error": "bad_request", "message": e.to_string() })
            }
        };

        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    tracing::info!("input closed, stopping");
    Ok(())
}

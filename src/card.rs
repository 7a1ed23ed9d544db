use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use zeroize::Zeroize;

/// Количество ячеек на карте OTP (1..=35).
pub const SLOT_COUNT: usize = 35;

/// Перевести внешний номер ячейки (1..=35) во внутренний индекс (0..35).
pub fn slot_position(index: usize) -> Option<usize> {
    if (1..=SLOT_COUNT).contains(&index) {
        Some(index - 1)
    } else {
        None
    }
}

/// Ровно 35 кодов карты. Пустая строка означает "не записано".
#[derive(Clone, PartialEq, Eq)]
pub struct SlotCodes(Vec<String>);

impl SlotCodes {
    /// Принимает только последовательность из ровно 35 строк; иначе возвращает её длину.
    pub fn new(codes: Vec<String>) -> Result<Self, usize> {
        if codes.len() == SLOT_COUNT {
            Ok(Self(codes))
        } else {
            Err(codes.len())
        }
    }

    pub fn empty() -> Self {
        Self(vec![String::new(); SLOT_COUNT])
    }

    /// Код для внешнего номера ячейки, `None` если номер вне 1..=35.
    pub fn get(&self, index: usize) -> Option<&str> {
        slot_position(index).map(|pos| self.0[pos].as_str())
    }

    pub(crate) fn set(&mut self, index: usize, code: String) -> bool {
        match slot_position(index) {
            Some(pos) => {
                self.0[pos] = code;
                true
            }
            None => false,
        }
    }

    pub fn filled(&self) -> usize {
        self.0.iter().filter(|c| !c.is_empty()).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }
}

// Коды не должны попадать в логи.
impl std::fmt::Debug for SlotCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SlotCodes({} filled)", self.filled())
    }
}

impl Drop for SlotCodes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Запись карты в cards.json. Коды лежат только в зашифрованном виде.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OtpCard {
    pub id: String,
    pub name: String,
    #[serde(rename = "data")]
    pub cipher_payload: String,
    #[serde(rename = "lastUsed", default, with = "time::serde::rfc3339::option")]
    pub last_used_at: Option<OffsetDateTime>,
}

impl OtpCard {
    pub fn summary(&self) -> CardSummary {
        CardSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            last_used_at: self.last_used_at,
        }
    }
}

/// Метаданные карты без шифротекста.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CardSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "lastUsed", with = "time::serde::rfc3339::option")]
    pub last_used_at: Option<OffsetDateTime>,
}

#[cfg(test)]
pub(crate) fn sample_codes() -> SlotCodes {
    let codes = (1..=SLOT_COUNT).map(|i| format!("{:04}", i * 7)).collect();
    SlotCodes::new(codes).unwrap()
}

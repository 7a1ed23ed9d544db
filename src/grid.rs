use crate::card::{SLOT_COUNT, SlotCodes};

/// Сетка, собранная из текста.
#[derive(Debug)]
pub struct GridImport {
    pub codes: SlotCodes,
    pub filled: usize,
}

/// Разобрать текст карты (вывод OCR, скопированная таблица, строки `N CODE`).
///
/// Ищем пары `<номер 1-2 цифры><пробелы?><код 4 цифры>` на границах слов.
/// Номера вне 1..=35 пропускаются, для повторов побеждает первое вхождение.
pub fn parse_grid(text: &str) -> GridImport {
    let clean: String = text
        .chars()
        .map(|c| if c.is_ascii_digit() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let tokens: Vec<&str> = clean.split_whitespace().collect();

    let mut codes = SlotCodes::empty();
    let mut seen = [false; SLOT_COUNT];
    let mut filled = 0;

    let mut i = 0;
    while i < tokens.len() {
        let (pair, consumed) = match split_pair(tokens[i]) {
            Some(pair) => (Some(pair), 1),
            None => match tokens.get(i + 1) {
                Some(next) if is_index(tokens[i]) && is_code(next) => {
                    (Some((tokens[i], *next)), 2)
                }
                _ => (None, 1),
            },
        };

        if let Some((idx, code)) = pair {
            if let Ok(n) = idx.parse::<usize>() {
                if (1..=SLOT_COUNT).contains(&n) && !seen[n - 1] {
                    seen[n - 1] = true;
                    codes.set(n, code.to_string());
                    filled += 1;
                }
            }
        }
        i += consumed;
    }

    tracing::debug!(filled, "parsed grid text");
    GridImport { codes, filled }
}

// "125678" -> ("12", "5678"), "34321" -> ("3", "4321")
fn split_pair(token: &str) -> Option<(&str, &str)> {
    match token.len() {
        5 | 6 => {
            let (idx, code) = token.split_at(token.len() - 4);
            Some((idx, code))
        }
        _ => None,
    }
}

fn is_index(token: &str) -> bool {
    (1..=2).contains(&token.len())
}

fn is_code(token: &str) -> bool {
    token.len() == 4
}

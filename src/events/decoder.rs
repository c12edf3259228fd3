//! Typed decoding of Trixy event payloads.
//!
//! [`decode_event`] is pure: it reads a [`FieldBag`] and produces one
//! [`EventRecord`], or a [`IndexerError::DecodingError`] naming the offending
//! field. Required business keys are never defaulted; only `options`,
//! `yieldProtocol` and `protocolIndex` have fallbacks.

use std::collections::BTreeMap;

use eyre::{bail, eyre, WrapErr};

use super::{EventKind, EventMeta, EventRecord};
use crate::chain::cadence::{CadenceValue, FieldBag};
use crate::chain::RawEvent;
use crate::db::models::{
    BetPlacedRecord, MarketCreatedRecord, MarketResolvedRecord, WinningsClaimedRecord,
    YieldDepositedRecord, YieldWithdrawnRecord,
};
use crate::error::{IndexerError, IndexerResult};

/// Fractional digits of a Cadence `UFix64`.
pub const UFIX64_DECIMALS: usize = 8;

const OPTIONS_NAMES: &[&str] = &["options", "protocols"];
const DEPOSIT_USER_NAMES: &[&str] = &["user", "userAddress"];
const DEPOSIT_PROTOCOL_NAMES: &[&str] = &["protocol", "protocolName"];

/// Decode a field bag into the record for `kind`.
///
/// # Errors
///
/// Returns a decoding error when a required field is missing or carries an
/// unexpected Cadence type.
pub fn decode_event<F>(kind: EventKind, fields: &F, meta: EventMeta) -> IndexerResult<EventRecord>
where
    F: FieldBag + ?Sized,
{
    let decoded = match kind {
        EventKind::MarketCreated => market_created(fields, meta).map(EventRecord::MarketCreated),
        EventKind::BetPlaced => bet_placed(fields, meta).map(EventRecord::BetPlaced),
        EventKind::MarketResolved => {
            market_resolved(fields, meta).map(EventRecord::MarketResolved)
        }
        EventKind::WinningsClaimed => {
            winnings_claimed(fields, meta).map(EventRecord::WinningsClaimed)
        }
        EventKind::YieldDeposited => {
            yield_deposited(fields, meta).map(EventRecord::YieldDeposited)
        }
        EventKind::YieldWithdrawn => {
            yield_withdrawn(fields, meta).map(EventRecord::YieldWithdrawn)
        }
    };

    decoded.map_err(|e| IndexerError::decoding(format!("Failed to decode {kind}: {e:#}"), None))
}

/// Decode a raw chain event: parse its JSON-Cadence payload, then
/// [`decode_event`] over the composite's fields.
///
/// # Errors
///
/// Returns a decoding error when the payload is not an event composite or any
/// field fails to decode.
pub fn decode_raw(
    kind: EventKind,
    raw: &RawEvent,
    block_height: u64,
    block_timestamp: i64,
) -> IndexerResult<EventRecord> {
    let value = CadenceValue::from_json(&raw.payload).map_err(|e| {
        IndexerError::decoding(format!("Malformed {kind} payload: {e:#}"), None)
    })?;

    let fields = value.event_fields().ok_or_else(|| {
        IndexerError::decoding(
            format!(
                "{kind} payload is a {} rather than an event",
                value.type_name()
            ),
            None,
        )
    })?;

    let meta = EventMeta {
        block_height,
        block_timestamp,
        transaction_id: raw.transaction_id.clone(),
        event_index: raw.event_index,
    };

    decode_event(kind, fields, meta)
}

fn market_created<F: FieldBag + ?Sized>(f: &F, meta: EventMeta) -> eyre::Result<MarketCreatedRecord> {
    let options = match f.first_present(OPTIONS_NAMES) {
        Some((name, value)) => string_list(name, value)?,
        None => Vec::new(),
    };
    let yield_protocol = match f.lookup("yieldProtocol") {
        Some(value) => string_value("yieldProtocol", value)?,
        None => String::new(),
    };

    Ok(MarketCreatedRecord {
        market_id: required_unsigned(f, "marketId")?,
        question: required_string(f, "question")?,
        end_time: whole_seconds(required_fixed(f, "endTime")?),
        options,
        yield_protocol,
        creator: required_address(f, "creator")?,
        meta,
    })
}

fn bet_placed<F: FieldBag + ?Sized>(f: &F, meta: EventMeta) -> eyre::Result<BetPlacedRecord> {
    let protocol_index = match f.lookup("protocolIndex") {
        Some(value) => {
            let index = unsigned_value("protocolIndex", value)?;
            u32::try_from(index).wrap_err_with(|| format!("protocolIndex {index} out of range"))?
        }
        None => 0,
    };

    Ok(BetPlacedRecord {
        market_id: required_unsigned(f, "marketId")?,
        user: required_address(f, "user")?,
        selected_option: required_string(f, "selectedOption")?,
        protocol_index,
        amount: required_fixed(f, "amount")?,
        meta,
    })
}

fn market_resolved<F: FieldBag + ?Sized>(
    f: &F,
    meta: EventMeta,
) -> eyre::Result<MarketResolvedRecord> {
    let apys = f
        .lookup("finalAPYs")
        .ok_or_else(|| eyre!("missing field `finalAPYs`"))?;

    Ok(MarketResolvedRecord {
        market_id: required_unsigned(f, "marketId")?,
        winning_option: required_string(f, "winningOption")?,
        final_apys: string_map("finalAPYs", apys)?,
        resolved_at: required_fixed(f, "resolvedAt")?,
        meta,
    })
}

fn winnings_claimed<F: FieldBag + ?Sized>(
    f: &F,
    meta: EventMeta,
) -> eyre::Result<WinningsClaimedRecord> {
    Ok(WinningsClaimedRecord {
        market_id: required_unsigned(f, "marketId")?,
        user: required_address(f, "user")?,
        payout: required_fixed(f, "payout")?,
        meta,
    })
}

fn yield_deposited<F: FieldBag + ?Sized>(
    f: &F,
    meta: EventMeta,
) -> eyre::Result<YieldDepositedRecord> {
    let (user_field, user) = f
        .first_present(DEPOSIT_USER_NAMES)
        .ok_or_else(|| eyre!("missing field `user` (or `userAddress`)"))?;
    let (protocol_field, protocol) = f
        .first_present(DEPOSIT_PROTOCOL_NAMES)
        .ok_or_else(|| eyre!("missing field `protocol` (or `protocolName`)"))?;

    let position_id = match (f.lookup("positionId"), f.lookup("marketId")) {
        (Some(CadenceValue::String(s)), _) => s.clone(),
        (Some(value), _) => unsigned_value("positionId", value)?.to_string(),
        (None, Some(market)) => unsigned_value("marketId", market)?.to_string(),
        (None, None) => bail!("missing field `positionId` (or `marketId`)"),
    };

    Ok(YieldDepositedRecord {
        user_address: address_value(user_field, user)?,
        protocol_name: string_value(protocol_field, protocol)?,
        amount: required_fixed(f, "amount")?,
        position_id,
        meta,
    })
}

fn yield_withdrawn<F: FieldBag + ?Sized>(
    f: &F,
    meta: EventMeta,
) -> eyre::Result<YieldWithdrawnRecord> {
    Ok(YieldWithdrawnRecord {
        market_id: required_unsigned(f, "marketId")?,
        protocol: required_string(f, "protocol")?,
        amount: required_fixed(f, "amount")?,
        yield_earned: required_fixed(f, "yieldEarned")?,
        meta,
    })
}

fn required<'a, F: FieldBag + ?Sized>(f: &'a F, name: &str) -> eyre::Result<&'a CadenceValue> {
    f.lookup(name)
        .ok_or_else(|| eyre!("missing field `{name}`"))
}

fn required_unsigned<F: FieldBag + ?Sized>(f: &F, name: &str) -> eyre::Result<u64> {
    unsigned_value(name, required(f, name)?)
}

fn required_string<F: FieldBag + ?Sized>(f: &F, name: &str) -> eyre::Result<String> {
    string_value(name, required(f, name)?)
}

fn required_address<F: FieldBag + ?Sized>(f: &F, name: &str) -> eyre::Result<String> {
    address_value(name, required(f, name)?)
}

fn required_fixed<F: FieldBag + ?Sized>(f: &F, name: &str) -> eyre::Result<String> {
    fixed_value(name, required(f, name)?)
}

fn wrong_type(name: &str, expected: &str, value: &CadenceValue) -> eyre::Report {
    eyre!(
        "field `{name}` is {} but {expected} was expected",
        value.type_name()
    )
}

fn unsigned_value(name: &str, value: &CadenceValue) -> eyre::Result<u64> {
    value
        .as_unsigned()
        .ok_or_else(|| wrong_type(name, "an unsigned integer", value))
}

fn string_value(name: &str, value: &CadenceValue) -> eyre::Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type(name, "String", value))
}

fn address_value(name: &str, value: &CadenceValue) -> eyre::Result<String> {
    let raw = value
        .as_address()
        .ok_or_else(|| wrong_type(name, "Address", value))?;
    canonical_address(raw).wrap_err_with(|| format!("field `{name}`"))
}

/// Every fixed-point field of the contract is a `UFix64`.
fn fixed_value(name: &str, value: &CadenceValue) -> eyre::Result<String> {
    let raw = value
        .as_fixed_point()
        .filter(|_| value.type_name() == "UFix64")
        .ok_or_else(|| wrong_type(name, "UFix64", value))?;
    if raw.trim_start().starts_with('-') {
        bail!("field `{name}` is negative ('{raw}') but UFix64 is unsigned");
    }
    canonical_fixed(raw).wrap_err_with(|| format!("field `{name}`"))
}

fn string_list(name: &str, value: &CadenceValue) -> eyre::Result<Vec<String>> {
    let items = value
        .as_list()
        .ok_or_else(|| wrong_type(name, "Array", value))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| string_value(&format!("{name}[{i}]"), item))
        .collect()
}

fn string_map(name: &str, value: &CadenceValue) -> eyre::Result<BTreeMap<String, String>> {
    let entries = value
        .as_map()
        .ok_or_else(|| wrong_type(name, "Dictionary", value))?;

    let mut map = BTreeMap::new();
    for (key, val) in entries {
        let key = string_value(&format!("{name} key"), key)?;
        let val = fixed_value(&format!("{name}[{key}]"), val)?;
        map.insert(key, val);
    }
    Ok(map)
}

/// Lowercase `0x`-prefixed form of a Flow address.
///
/// # Errors
///
/// Fails on empty or non-hex input.
pub fn canonical_address(raw: &str) -> eyre::Result<String> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid address '{raw}'");
    }
    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}

/// Canonical fixed-point text with exactly [`UFIX64_DECIMALS`] fractional
/// digits, e.g. `"12.5"` becomes `"12.50000000"`.
///
/// # Errors
///
/// Fails when the text is not a decimal number or has more than eight
/// fractional digits.
pub fn canonical_fixed(raw: &str) -> eyre::Result<String> {
    let (sign, unsigned) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() || !all_digits(int_part) || !all_digits(frac_part) {
        bail!("invalid fixed-point value '{raw}'");
    }
    if frac_part.len() > UFIX64_DECIMALS {
        bail!("fixed-point value '{raw}' has more than {UFIX64_DECIMALS} decimals");
    }

    Ok(format!(
        "{sign}{int_part}.{frac_part:0<width$}",
        width = UFIX64_DECIMALS
    ))
}

/// Integer part of a canonical fixed-point seconds value.
fn whole_seconds(canonical: String) -> String {
    match canonical.split_once('.') {
        Some((int_part, _)) => int_part.to_string(),
        None => canonical,
    }
}

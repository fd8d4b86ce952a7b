//! 原始类型的文本编解码。
//!
//! 查询串参数解析、查询 URL 构造与 JSON 中以字符串承载的原始类型共用同一套格式：
//! - `DateTime`：`YYYY-MM-DDThh:mm:ss[.fff]`；
//! - `DateTimeOffset`：RFC 3339；
//! - `TimeSpan`：`[-][d.]hh:mm:ss[.fffffff]`，精度 100 纳秒；
//! - 数值一律使用与区域无关的格式。

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::model::PrimitiveType;
use crate::value::NativeValue;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const NANOS_PER_TICK: i64 = 100;
const TICKS_PER_SECOND: u64 = 10_000_000;
const TICKS_PER_MINUTE: u64 = TICKS_PER_SECOND * 60;
const TICKS_PER_HOUR: u64 = TICKS_PER_MINUTE * 60;
const TICKS_PER_DAY: u64 = TICKS_PER_HOUR * 24;

fn invalid(primitive: PrimitiveType, text: &str) -> ServiceError {
    ServiceError::serialization(format!("Invalid {primitive} value: {text}"))
}

pub fn format_datetime(value: &NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

pub fn parse_datetime(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|date| date.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .or_else(|_| DateTime::parse_from_rfc3339(text).map(|dt| dt.naive_local()))
        .map_err(|_| invalid(PrimitiveType::DateTime, text))
}

pub fn format_datetime_offset(value: &DateTime<FixedOffset>) -> String {
    value.to_rfc3339()
}

pub fn parse_datetime_offset(text: &str) -> Result<DateTime<FixedOffset>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| parse_datetime(text).map(|naive| naive.and_utc().fixed_offset()))
        .map_err(|_| invalid(PrimitiveType::DateTimeOffset, text))
}

/// 以 `[-][d.]hh:mm:ss[.fffffff]` 格式输出时长。
pub fn format_timespan(value: &TimeDelta) -> Result<String> {
    let nanos = value
        .num_nanoseconds()
        .ok_or_else(|| ServiceError::serialization("TimeSpan out of range"))?;
    let ticks = nanos.unsigned_abs() / NANOS_PER_TICK as u64;
    let days = ticks / TICKS_PER_DAY;
    let hours = ticks % TICKS_PER_DAY / TICKS_PER_HOUR;
    let minutes = ticks % TICKS_PER_HOUR / TICKS_PER_MINUTE;
    let seconds = ticks % TICKS_PER_MINUTE / TICKS_PER_SECOND;
    let fraction = ticks % TICKS_PER_SECOND;

    let mut out = String::new();
    if nanos < 0 {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if fraction > 0 {
        out.push_str(&format!(".{fraction:07}"));
    }
    Ok(out)
}

/// 解析 `[-][d.]hh:mm:ss[.fffffff]` 或纯天数格式的时长。
pub fn parse_timespan(text: &str) -> Result<TimeDelta> {
    let original = text;
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let fail = || invalid(PrimitiveType::TimeSpan, original);

    let parts: Vec<&str> = body.split(':').collect();
    let ticks: u64 = match parts.as_slice() {
        [days] => days
            .parse::<u64>()
            .ok()
            .and_then(|days| days.checked_mul(TICKS_PER_DAY))
            .ok_or_else(fail)?,
        [head, minutes, rest] => {
            let (days, hours) = match head.split_once('.') {
                Some((days, hours)) => (days.parse::<u64>().map_err(|_| fail())?, hours),
                None => (0, *head),
            };
            let hours = hours.parse::<u64>().map_err(|_| fail())?;
            let minutes = minutes.parse::<u64>().map_err(|_| fail())?;
            let (seconds, fraction) = match rest.split_once('.') {
                Some((seconds, fraction)) => (seconds, fraction),
                None => (*rest, ""),
            };
            let seconds = seconds.parse::<u64>().map_err(|_| fail())?;
            if hours >= 24 || minutes >= 60 || seconds >= 60 || fraction.len() > 7 {
                return Err(fail());
            }
            let fraction_ticks = if fraction.is_empty() {
                0
            } else {
                if !fraction.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(fail());
                }
                format!("{fraction:0<7}").parse::<u64>().map_err(|_| fail())?
            };
            // 天数来自外部输入，整条累加链都需防溢出。
            days.checked_mul(TICKS_PER_DAY)
                .and_then(|ticks| ticks.checked_add(hours * TICKS_PER_HOUR))
                .and_then(|ticks| ticks.checked_add(minutes * TICKS_PER_MINUTE))
                .and_then(|ticks| ticks.checked_add(seconds * TICKS_PER_SECOND))
                .and_then(|ticks| ticks.checked_add(fraction_ticks))
                .ok_or_else(fail)?
        }
        _ => return Err(fail()),
    };

    let nanos = i64::try_from(ticks)
        .ok()
        .and_then(|ticks| ticks.checked_mul(NANOS_PER_TICK))
        .ok_or_else(fail)?;
    Ok(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}

/// 把文本解析为给定原始类型的值。
pub fn parse_primitive(primitive: PrimitiveType, text: &str) -> Result<NativeValue> {
    let trimmed = text.trim();
    let value = match primitive {
        PrimitiveType::Void => NativeValue::Null,
        PrimitiveType::Boolean => {
            if trimmed.eq_ignore_ascii_case("true") {
                NativeValue::Bool(true)
            } else if trimmed.eq_ignore_ascii_case("false") {
                NativeValue::Bool(false)
            } else {
                return Err(invalid(primitive, text));
            }
        }
        PrimitiveType::Byte => {
            NativeValue::Byte(trimmed.parse().map_err(|_| invalid(primitive, text))?)
        }
        PrimitiveType::Int32 => {
            NativeValue::Int32(trimmed.parse().map_err(|_| invalid(primitive, text))?)
        }
        PrimitiveType::Int64 => {
            NativeValue::Int64(trimmed.parse().map_err(|_| invalid(primitive, text))?)
        }
        // 数字写法溢出为无穷时拒绝；显式的 `Infinity` 等字面量照常接受。
        PrimitiveType::Single => NativeValue::Single(
            trimmed
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite() || !trimmed.bytes().any(|b| b.is_ascii_digit()))
                .ok_or_else(|| invalid(primitive, text))?,
        ),
        PrimitiveType::Double => {
            NativeValue::Double(trimmed.parse().map_err(|_| invalid(primitive, text))?)
        }
        PrimitiveType::Decimal => NativeValue::Decimal(
            Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .map_err(|_| invalid(primitive, text))?,
        ),
        PrimitiveType::String => NativeValue::String(text.to_owned()),
        PrimitiveType::Guid => {
            NativeValue::Guid(Uuid::parse_str(trimmed).map_err(|_| invalid(primitive, text))?)
        }
        PrimitiveType::DateTime => NativeValue::DateTime(parse_datetime(trimmed)?),
        PrimitiveType::DateTimeOffset => {
            NativeValue::DateTimeOffset(parse_datetime_offset(trimmed)?)
        }
        PrimitiveType::TimeSpan => NativeValue::TimeSpan(parse_timespan(trimmed)?),
    };
    Ok(value)
}

/// 以与区域无关的格式输出原始值；`Null` 输出为空串，非原始值返回 `None`。
pub fn format_primitive(value: &NativeValue) -> Option<String> {
    let text = match value {
        NativeValue::Null => String::new(),
        NativeValue::Bool(v) => v.to_string(),
        NativeValue::Byte(v) => v.to_string(),
        NativeValue::Int32(v) | NativeValue::Enum(v) => v.to_string(),
        NativeValue::Int64(v) => v.to_string(),
        NativeValue::Single(v) => v.to_string(),
        NativeValue::Double(v) => v.to_string(),
        NativeValue::Decimal(v) => v.to_string(),
        NativeValue::String(v) => v.clone(),
        NativeValue::Guid(v) => v.hyphenated().to_string(),
        NativeValue::DateTime(v) => format_datetime(v),
        NativeValue::DateTimeOffset(v) => format_datetime_offset(v),
        NativeValue::TimeSpan(v) => format_timespan(v).ok()?,
        NativeValue::Array(_) | NativeValue::Entity(_) => return None,
    };
    Some(text)
}

// src/privacy/gdpr.rs

//! GDPR 信息提取。
//!
//! `regs.ext.gdpr` 与 `user.ext.consent` 都是调用方透传的任意 JSON，
//! 任何格式异常都退化为“未知 / 空字符串”，绝不让隐私字段中断一次竞价。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::openrtb::request::{Regs, User};

/// 法规是否适用。`Unknown` 与 `No` 必须区分，调用方不能把空值当成“不适用”。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegulationFlag {
    Yes,
    No,
    #[default]
    Unknown,
}

impl RegulationFlag {
    /// 与 `gdpr_from` 返回值一致的字符串形式：`"1"`、`"0"` 或 `""`
    pub fn as_str(&self) -> &'static str {
        match self {
            RegulationFlag::Yes => "1",
            RegulationFlag::No => "0",
            RegulationFlag::Unknown => "",
        }
    }

    fn from_flag(flag: &str) -> Self {
        match flag {
            "1" => RegulationFlag::Yes,
            "0" => RegulationFlag::No,
            _ => RegulationFlag::Unknown,
        }
    }
}

/// 一次竞价的同意描述，竞价开始时生成一次，之后所有 adapter 共享同一份。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsentDescriptor {
    pub regulation_applies: RegulationFlag,
    pub consent_string: Option<String>,
}

impl ConsentDescriptor {
    pub fn from_request(regs: Option<&Regs>, user: Option<&User>) -> Self {
        let flag = gdpr_from(regs.and_then(|r| r.ext.as_ref()));
        let consent = gdpr_consent_from(user.and_then(|u| u.ext.as_ref()));
        Self {
            regulation_applies: RegulationFlag::from_flag(&flag),
            consent_string: if consent.is_empty() { None } else { Some(consent) },
        }
    }

    /// 是否允许向 bidder 透传用户标识（buyeruid、user id、cookie）。
    /// 法规明确适用且没有 consent string 时才禁止；`Unknown` 不做剥离。
    pub fn allows_user_ids(&self) -> bool {
        !(self.regulation_applies == RegulationFlag::Yes && self.consent_string.is_none())
    }

    /// 转发给 bidder 的 `regs.ext`，未知时不下发
    pub fn regs_ext(&self) -> Option<Value> {
        match self.regulation_applies {
            RegulationFlag::Yes => Some(serde_json::json!({ "gdpr": 1 })),
            RegulationFlag::No => Some(serde_json::json!({ "gdpr": 0 })),
            RegulationFlag::Unknown => None,
        }
    }

    /// 转发给 bidder 的 `user.ext`
    pub fn user_ext(&self) -> Option<Value> {
        self.consent_string
            .as_ref()
            .map(|consent| serde_json::json!({ "consent": consent }))
    }
}

/// 从 `regs.ext` 提取 gdpr 标志，只接受整数 0 / 1
pub fn gdpr_from(regs_ext: Option<&Value>) -> String {
    let flag = regs_ext
        .and_then(|ext| ext.get("gdpr"))
        .and_then(Value::as_i64);
    match flag {
        Some(1) => "1".to_string(),
        Some(0) => "0".to_string(),
        _ => String::new(),
    }
}

/// 从 `user.ext` 提取 consent string，原样返回，不做格式校验
pub fn gdpr_consent_from(user_ext: Option<&Value>) -> String {
    user_ext
        .and_then(|ext| ext.get("consent"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn gdpr_from_returns_empty_when_ext_is_absent() {
        assert_eq!(gdpr_from(None), "");
    }

    #[test]
    fn gdpr_from_returns_empty_when_field_is_not_an_integer() {
        assert_eq!(gdpr_from(Some(&json!({ "gdpr": "gdpr" }))), "");
        assert_eq!(gdpr_from(Some(&json!({}))), "");
    }

    #[test]
    fn gdpr_from_returns_empty_outside_zero_and_one() {
        assert_eq!(gdpr_from(Some(&json!({ "gdpr": 2 }))), "");
        assert_eq!(gdpr_from(Some(&json!({ "gdpr": -1 }))), "");
    }

    #[test]
    fn gdpr_from_returns_flag() {
        assert_eq!(gdpr_from(Some(&json!({ "gdpr": 1 }))), "1");
        assert_eq!(gdpr_from(Some(&json!({ "gdpr": 0 }))), "0");
    }

    #[test]
    fn consent_is_returned_unmodified() {
        assert_eq!(gdpr_consent_from(None), "");
        assert_eq!(gdpr_consent_from(Some(&json!({}))), "");
        assert_eq!(
            gdpr_consent_from(Some(&json!({ "consent": " BOEFEAyOEFEAyAHABDENAI4AAAB9vABAASA " }))),
            " BOEFEAyOEFEAyAHABDENAI4AAAB9vABAASA "
        );
    }

    #[test]
    fn descriptor_strips_ids_only_when_gdpr_applies_without_consent() {
        let regs = Regs { coppa: None, ext: Some(json!({ "gdpr": 1 })) };
        let no_consent = ConsentDescriptor::from_request(Some(&regs), None);
        assert_eq!(no_consent.regulation_applies, RegulationFlag::Yes);
        assert!(!no_consent.allows_user_ids());

        let user = User { ext: Some(json!({ "consent": "abc" })), ..Default::default() };
        let with_consent = ConsentDescriptor::from_request(Some(&regs), Some(&user));
        assert!(with_consent.allows_user_ids());
        assert_eq!(with_consent.user_ext(), Some(json!({ "consent": "abc" })));

        let unknown = ConsentDescriptor::from_request(None, None);
        assert_eq!(unknown.regulation_applies, RegulationFlag::Unknown);
        assert!(unknown.allows_user_ids());
        assert_eq!(unknown.regs_ext(), None);
    }

    proptest! {
        #[test]
        fn gdpr_from_never_yields_anything_but_known_flags(value in any::<i64>()) {
            let flag = gdpr_from(Some(&json!({ "gdpr": value })));
            match value {
                0 => prop_assert_eq!(flag, "0"),
                1 => prop_assert_eq!(flag, "1"),
                _ => prop_assert_eq!(flag, ""),
            }
        }

        #[test]
        fn consent_round_trips_any_string(consent in ".*") {
            let ext = json!({ "consent": consent.clone() });
            prop_assert_eq!(gdpr_consent_from(Some(&ext)), consent);
        }
    }
}

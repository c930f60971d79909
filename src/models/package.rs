use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use utoipa::ToSchema;

use crate::entities::{BillingCycle, DurationUnit, InputType, PackageName, package_entity};

/// 每个计量窗口的次数上限
///
/// 数据库中以可空整数保存（NULL = 不限量），JSON 中序列化为数字或 `"unlimited"`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureLimit {
    Limited(u32),
    Unlimited,
}

impl FeatureLimit {
    pub fn from_column(value: Option<i32>) -> Self {
        match value {
            Some(n) => FeatureLimit::Limited(n.max(0) as u32),
            None => FeatureLimit::Unlimited,
        }
    }

    pub fn to_column(self) -> Option<i32> {
        match self {
            FeatureLimit::Limited(n) => Some(n.min(i32::MAX as u32) as i32),
            FeatureLimit::Unlimited => None,
        }
    }

    /// 已用 `used` 次后的剩余额度，不会小于 0
    pub fn remaining(self, used: i32) -> FeatureLimit {
        match self {
            FeatureLimit::Limited(n) => {
                FeatureLimit::Limited((n as i64 - used.max(0) as i64).max(0) as u32)
            }
            FeatureLimit::Unlimited => FeatureLimit::Unlimited,
        }
    }
}

impl fmt::Display for FeatureLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureLimit::Limited(n) => write!(f, "{n}"),
            FeatureLimit::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl Serialize for FeatureLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FeatureLimit::Limited(n) => serializer.serialize_u32(*n),
            FeatureLimit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for FeatureLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LimitVisitor;

        impl Visitor<'_> for LimitVisitor {
            type Value = FeatureLimit;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative count or \"unlimited\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FeatureLimit, E> {
                u32::try_from(v)
                    .map(FeatureLimit::Limited)
                    .map_err(|_| E::custom("limit out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<FeatureLimit, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom("limit must not be negative"))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FeatureLimit, E> {
                if v.eq_ignore_ascii_case("unlimited") {
                    Ok(FeatureLimit::Unlimited)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(LimitVisitor)
    }
}

/// 单个音频允许的时长
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AudioFileLength {
    pub value: u32,
    pub unit: DurationUnit,
}

impl AudioFileLength {
    pub fn allowed_minutes(&self) -> u32 {
        match self.unit {
            DurationUnit::Minutes => self.value,
            DurationUnit::Hours => self.value.saturating_mul(60),
        }
    }
}

impl fmt::Display for AudioFileLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match (self.unit, self.value) {
            (DurationUnit::Minutes, 1) => "minute",
            (DurationUnit::Minutes, _) => "minutes",
            (DurationUnit::Hours, 1) => "hour",
            (DurationUnit::Hours, _) => "hours",
        };
        write!(f, "{} {}", self.value, unit)
    }
}

/// 套餐领域对象（由 packages 表行转换而来）
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub id: i32,
    pub name: PackageName,
    pub price_cents: i64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub audio_soap_notes: FeatureLimit,
    pub text_soap_notes: FeatureLimit,
    pub audio_file_length: AudioFileLength,
    pub yearly_discount: i32,
    pub trial_days: i32,
    pub is_active: bool,
}

impl Package {
    pub fn is_free(&self) -> bool {
        self.name == PackageName::Free
    }

    pub fn limit_for(&self, request_type: InputType) -> FeatureLimit {
        match request_type {
            InputType::Audio => self.audio_soap_notes,
            InputType::Text => self.text_soap_notes,
        }
    }

    /// 年付价格(美分) = 月价 × 12 × (100 - 折扣%) / 100；免费套餐恒为 0
    pub fn yearly_price_cents(&self) -> i64 {
        if self.billing_cycle == BillingCycle::Free {
            return 0;
        }
        let discount = self.yearly_discount.clamp(0, 100) as i64;
        self.price_cents * 12 * (100 - discount) / 100
    }
}

impl From<package_entity::Model> for Package {
    fn from(m: package_entity::Model) -> Self {
        Package {
            id: m.id,
            name: m.name,
            price_cents: m.price_cents,
            currency: m.currency,
            billing_cycle: m.billing_cycle,
            audio_soap_notes: FeatureLimit::from_column(m.audio_soap_notes),
            text_soap_notes: FeatureLimit::from_column(m.text_soap_notes),
            audio_file_length: AudioFileLength {
                value: m.audio_file_length_value.max(0) as u32,
                unit: m.audio_file_length_unit,
            },
            yearly_discount: m.yearly_discount,
            trial_days: m.trial_days,
            is_active: m.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PackageFeatures {
    #[schema(value_type = Object, example = 50)]
    pub audio_soap_notes: FeatureLimit,
    #[schema(value_type = Object, example = "unlimited")]
    pub text_soap_notes: FeatureLimit,
    pub audio_file_length: AudioFileLength,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PackageResponse {
    pub id: i32,
    pub name: PackageName,
    /// 月价(美分)
    pub price_cents: i64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub yearly_discount: i32,
    pub trial_days: i32,
    pub features: PackageFeatures,
}

impl From<Package> for PackageResponse {
    fn from(p: Package) -> Self {
        PackageResponse {
            id: p.id,
            name: p.name,
            price_cents: p.price_cents,
            currency: p.currency,
            billing_cycle: p.billing_cycle,
            yearly_discount: p.yearly_discount,
            trial_days: p.trial_days,
            features: PackageFeatures {
                audio_soap_notes: p.audio_soap_notes,
                text_soap_notes: p.text_soap_notes,
                audio_file_length: p.audio_file_length,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct YearlyPriceResponse {
    pub package_id: i32,
    pub monthly_price_cents: i64,
    pub yearly_price_cents: i64,
    pub yearly_discount: i32,
}

/// 套餐目录中的一项（启动时按 name upsert）
#[derive(Debug, Clone)]
pub struct PackageSeed {
    pub name: PackageName,
    pub price_cents: i64,
    pub billing_cycle: BillingCycle,
    pub audio_soap_notes: FeatureLimit,
    pub text_soap_notes: FeatureLimit,
    pub audio_file_length: AudioFileLength,
    pub yearly_discount: i32,
}

pub fn default_catalog() -> Vec<PackageSeed> {
    use FeatureLimit::*;
    vec![
        PackageSeed {
            name: PackageName::Premium,
            price_cents: 8900,
            billing_cycle: BillingCycle::Monthly,
            audio_soap_notes: Unlimited,
            text_soap_notes: Unlimited,
            audio_file_length: AudioFileLength { value: 3, unit: DurationUnit::Hours },
            yearly_discount: 10,
        },
        PackageSeed {
            name: PackageName::Standard,
            price_cents: 5900,
            billing_cycle: BillingCycle::Monthly,
            audio_soap_notes: Limited(50),
            text_soap_notes: Limited(100),
            audio_file_length: AudioFileLength { value: 1, unit: DurationUnit::Hours },
            yearly_discount: 10,
        },
        PackageSeed {
            name: PackageName::Basic,
            price_cents: 3900,
            billing_cycle: BillingCycle::Monthly,
            audio_soap_notes: Limited(20),
            text_soap_notes: Limited(50),
            audio_file_length: AudioFileLength { value: 30, unit: DurationUnit::Minutes },
            yearly_discount: 10,
        },
        PackageSeed {
            name: PackageName::Free,
            price_cents: 0,
            billing_cycle: BillingCycle::Free,
            audio_soap_notes: Limited(3),
            text_soap_notes: Limited(5),
            audio_file_length: AudioFileLength { value: 10, unit: DurationUnit::Minutes },
            yearly_discount: 0,
        },
    ]
}

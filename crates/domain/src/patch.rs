//! 部分更新字段。
//!
//! `Patch::Absent` 表示调用方没有提供该字段，`Patch::Set` 表示显式提供了新值，
//! 哪怕新值是空字符串。反序列化时配合 `#[serde(default)]` 使用：
//! 缺失的 JSON 字段得到 `Absent`，出现的字段得到 `Set`。

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Absent,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Absent
    }
}

impl<T> Patch<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Patch::Set(_))
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Absent => Patch::Absent,
            Patch::Set(value) => Patch::Set(value),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Patch<U> {
        match self {
            Patch::Absent => Patch::Absent,
            Patch::Set(value) => Patch::Set(f(value)),
        }
    }

    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Patch<U>, E> {
        match self {
            Patch::Absent => Ok(Patch::Absent),
            Patch::Set(value) => f(value).map(Patch::Set),
        }
    }

    /// 若字段被提供，则覆盖目标值，返回是否发生了写入。
    pub fn apply_to(self, target: &mut T) -> bool {
        match self {
            Patch::Absent => false,
            Patch::Set(value) => {
                *target = value;
                true
            }
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Patch::Absent => None,
            Patch::Set(value) => Some(value),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Patch::Set(value),
            None => Patch::Absent,
        }
    }
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Patch::Set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Payload {
        #[serde(default)]
        bio: Patch<String>,
        #[serde(default)]
        name: Patch<String>,
    }

    #[test]
    fn missing_field_is_absent_and_empty_string_is_set() {
        let payload: Payload = serde_json::from_str(r#"{"bio": ""}"#).unwrap();
        assert_eq!(payload.bio, Patch::Set(String::new()));
        assert_eq!(payload.name, Patch::Absent);
    }

    #[test]
    fn apply_only_touches_supplied_fields() {
        let mut name = "old".to_string();
        assert!(!Patch::<String>::Absent.apply_to(&mut name));
        assert_eq!(name, "old");
        assert!(Patch::Set("new".to_string()).apply_to(&mut name));
        assert_eq!(name, "new");
    }

    #[test]
    fn try_map_propagates_errors_only_for_set_fields() {
        let absent: Patch<&str> = Patch::Absent;
        assert_eq!(absent.try_map(|_| Err::<u8, _>("boom")), Ok(Patch::Absent));
        let set = Patch::Set("x");
        assert_eq!(set.try_map(|_| Err::<u8, _>("boom")), Err("boom"));
    }
}

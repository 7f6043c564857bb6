//! 自然排序
//!
//! 数字按数值比较: img1, img2, img10

use std::cmp::Ordering;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::Error;

lazy_static! {
    // 只匹配 ASCII 数字
    static ref DIGIT_RUN: Result<Regex, regex::Error> = Regex::new(r"[0-9]+");
}

/// 连续数字片段, 去掉前导零后按数值比较
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericRun(String);

impl NumericRun {
    fn new(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        Self(trimmed.to_string())
    }
}

impl Ord for NumericRun {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for NumericRun {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 排序键片段
///
/// 文本与数字交替出现, 第一个片段总是文本(可能为空)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyPart {
    Text(String),
    Number(NumericRun),
}

/// 自然排序键
pub type NaturalKey = Vec<KeyPart>;

/// 生成自然排序键, 文本部分忽略大小写
pub fn natural_sort_key(s: &str) -> Result<NaturalKey, Error> {
    let re = DIGIT_RUN.as_ref().map_err(|e| Error::RegexError(e.clone()))?;

    let mut parts = Vec::new();
    let mut text_start = 0;
    for m in re.find_iter(s) {
        parts.push(KeyPart::Text(s[text_start..m.start()].to_lowercase()));
        parts.push(KeyPart::Number(NumericRun::new(m.as_str())));
        text_start = m.end();
    }
    parts.push(KeyPart::Text(s[text_start..].to_lowercase()));
    Ok(parts)
}

/// 按自然顺序排序
///
/// 排序键相同时按原始名称排序, 保证结果稳定
pub fn natural_sort(files: &mut [String]) -> Result<(), Error> {
    let mut keyed = files
        .iter()
        .map(|name| Ok((natural_sort_key(name)?, name.clone())))
        .collect::<Result<Vec<_>, Error>>()?;
    keyed.sort();

    for (slot, (_, name)) in files.iter_mut().zip(keyed) {
        *slot = name;
    }
    Ok(())
}

//! 定位策略
//!
//! 页面元素用有序的定位器列表描述：稳定 id 优先，其次属性匹配，最后是通用结构兜底。
//! 与具体标记无关，配置里可以整体替换。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 单个定位器：CSS 选择器或 XPath
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    Xpath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::Xpath(expr.into())
    }

    pub fn value(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::Xpath(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={s}"),
            Locator::Xpath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// 按优先级排列的定位器链，逐个尝试，第一个命中的胜出
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorChain(pub Vec<Locator>);

impl LocatorChain {
    pub fn new(locators: Vec<Locator>) -> Self {
        Self(locators)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Locator> {
        self.0.iter()
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.0.contains(locator)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Locator>> for LocatorChain {
    fn from(v: Vec<Locator>) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_deserialize_tagged() {
        let loc: Locator = serde_json::from_str(r##"{"by": "css", "value": "#prompt-textarea"}"##).unwrap();
        assert_eq!(loc, Locator::css("#prompt-textarea"));
        let loc: Locator = serde_json::from_str(r#"{"by": "xpath", "value": "//textarea"}"#).unwrap();
        assert_eq!(loc.value(), "//textarea");
    }

    #[test]
    fn test_chain_order_preserved() {
        let chain = LocatorChain::new(vec![Locator::css("#a"), Locator::xpath("//b")]);
        let names: Vec<String> = chain.iter().map(|l| l.to_string()).collect();
        assert_eq!(names, vec!["css=#a", "xpath=//b"]);
    }
}

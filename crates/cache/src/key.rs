//! 缓存键构造
//!
//! 不变量：语义相同的请求必须产生逐字节相同的键。
//! 这是 singleflight 锁和命中率的正确性前提，不只是优化。

/// 确定性缓存键构造器
///
/// 所有片段统一做 trim + 小写归一化；可选过滤器集合排序去重，
/// 保证与传入顺序无关
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    parts: Vec<String>,
}

impl CacheKeyBuilder {
    /// 以资源名开始构造
    pub fn new(resource: &str) -> Self {
        Self {
            parts: vec![normalize(resource)],
        }
    }

    /// 追加命名参数
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.parts.push(format!("{}={}", name, normalize(value)));
        self
    }

    /// 追加可选参数，None 时写入空值占位，保证键形状稳定
    pub fn opt_param(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self.param(name, ""),
        }
    }

    /// 追加过滤器集合：排序 + 去重，顺序无关
    pub fn filters(mut self, name: &str, values: &[&str]) -> Self {
        let mut normalized: Vec<String> = values.iter().map(|v| normalize(v)).collect();
        normalized.sort();
        normalized.dedup();
        self.parts.push(format!("{}={}", name, normalized.join(",")));
        self
    }

    pub fn build(self) -> String {
        self.parts.join(":")
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_requests_identical_keys() {
        let a = CacheKeyBuilder::new("mvg")
            .param("departures", "marienplatz")
            .build();
        let b = CacheKeyBuilder::new(" MVG ")
            .param("departures", "  Marienplatz")
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_filter_order_independence() {
        let a = CacheKeyBuilder::new("departures")
            .param("station", "de:09162:6")
            .filters("modes", &["ubahn", "bus", "tram"])
            .build();
        let b = CacheKeyBuilder::new("departures")
            .param("station", "de:09162:6")
            .filters("modes", &["tram", "UBAHN", "bus"])
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_optional_params_keep_key_shape() {
        let some = CacheKeyBuilder::new("search")
            .opt_param("query", Some("Hauptbahnhof"))
            .build();
        let none = CacheKeyBuilder::new("search").opt_param("query", None).build();
        assert_eq!(some, "search:query=hauptbahnhof");
        assert_eq!(none, "search:query=");
        assert_ne!(some, none);
    }

    #[test]
    fn test_duplicate_filters_deduped() {
        let key = CacheKeyBuilder::new("departures")
            .filters("modes", &["bus", "bus", "tram"])
            .build();
        assert_eq!(key, "departures:modes=bus,tram");
    }
}

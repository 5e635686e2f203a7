use sha2::{Digest, Sha256};

/// 键基串最大长度
const MAX_BASE_CHARS: usize = 200;
/// 键中可读部分长度
const READABLE_CHARS: usize = 50;

/// 描述归一化：小写、去标点、空白折叠为 `_`
pub fn normalize_description(description: &str) -> String {
    let cleaned: String = description
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join("_")
}

/// 计算明细行的 SKU 键
///
/// 纯函数：同样的 (商品编码, 归一化描述, 单位) 永远得到同样的键。
pub fn derive_sku_key(product_code: &str, description: &str, unit_code: Option<&str>) -> String {
    let code = product_code.trim();
    let unit = normalize_description(unit_code.unwrap_or(""));
    let desc = normalize_description(description);

    let mut base = String::new();
    if !code.is_empty() {
        base.push_str(code);
        base.push('_');
    }
    base.push_str(&unit);
    base.push('_');
    base.push_str(&desc);

    let base: String = base.chars().take(MAX_BASE_CHARS).collect();
    let digest = format!("{:x}", Sha256::digest(base.as_bytes()));
    let readable: String = base.chars().take(READABLE_CHARS).collect();

    format!("sku_{}_{}", &digest[..8], readable)
}

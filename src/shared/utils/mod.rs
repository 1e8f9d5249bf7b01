//! 工具函数模块

use sha2::{Digest, Sha256};

/// 计算SHA256哈希（十六进制小写）
pub fn sha256_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// API Key脱敏，只保留前缀用于日志
pub fn mask_api_key(api_key: &str) -> String {
    let prefix: String = api_key.chars().take(6).collect();
    format!("{}***", prefix)
}

/// 判断模式中是否包含glob通配符
pub fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains(&['*', '?', '['][..])
}

/// 把前缀或glob统一成glob（无通配符的输入按前缀处理）
pub fn normalize_pattern(pattern: &str) -> String {
    if is_glob_pattern(pattern) {
        pattern.to_string()
    } else {
        format!("{}*", pattern)
    }
}

/// Redis风格的glob匹配，支持 `*`、`?` 和 `[abc]` 字符集
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&pattern, &text)
}

fn glob_match_from(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == '[' {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }

        // 回溯到最近的 `*`
        match star {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// 匹配 `[...]` 字符集，返回 (是否命中, 字符集之后的位置)；未闭合时返回None
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < pattern.len() && pattern[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            if pattern[i] <= c && c <= pattern[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if pattern[i] == c {
                matched = true;
            }
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("valuation:*", "valuation:123"));
        assert!(glob_match("user:?:profile", "user:7:profile"));
        assert!(!glob_match("user:?:profile", "user:77:profile"));
        assert!(glob_match("*:stats:*", "acct:stats:daily"));
        assert!(glob_match("key[12]", "key2"));
        assert!(!glob_match("key[^12]", "key2"));
        assert!(glob_match("key[a-c]x", "keybx"));
        assert!(!glob_match("prefix*", "other"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_normalize_pattern() {
        assert_eq!(normalize_pattern("valuation:"), "valuation:*");
        assert_eq!(normalize_pattern("valuation:*:x"), "valuation:*:x");
    }

    #[test]
    fn test_sha256_hash() {
        assert_eq!(
            sha256_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

//! Localized user-facing text.
//!
//! Message keys are the English text itself, so English needs no catalog
//! and an unknown key always renders as something readable.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Message keys used by the broker and the review console.
pub mod keys {
    pub const CORE_API_FAILED: &str = "Core API failed";
    pub const ACL_REJECT: &str = "ACL reject";
    pub const CONNECT_TOKEN_ERR: &str = "get connect token err";
    pub const CLIENT_NOT_INSTALLED: &str = "%s protocol client not installed.";
    pub const PROTOCOL_UNSUPPORTED: &str =
        "Terminal does not support protocol %s, please use web terminal to access";
    pub const PROXY_CREATE_FAILED: &str = "Create proxy session failed";
    pub const REVIEW_NEED_CONFIRM: &str =
        "Need ticket confirm to login, already send email to the reviewers";
    pub const REVIEW_REVIEWERS: &str = "Ticket Reviewers: %s";
    pub const REVIEW_DETAIL_URL: &str = "Could copy website URL to notify reviewers: %s";
    pub const REVIEW_WAITING: &str =
        "Please waiting for the reviewers to confirm, enter q to exit. ";
    pub const TICKET_REJECTED: &str = "Ticket was rejected";
    pub const TICKET_CLOSED: &str = "Ticket was closed";
}

/// Display language of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
    Ja,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
            Language::Ja => "ja",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    /// Accepts bare codes and locale tags such as `zh-hans` or `ja_JP`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let primary = lower.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "en" => Ok(Language::En),
            "zh" => Ok(Language::Zh),
            "ja" => Ok(Language::Ja),
            _ => Err(format!("unsupported language: {}", s)),
        }
    }
}

type Catalog = HashMap<&'static str, &'static str>;

static ZH: Lazy<Catalog> = Lazy::new(|| {
    HashMap::from([
        (keys::CORE_API_FAILED, "Core API 调用失败"),
        (keys::ACL_REJECT, "ACL 拒绝"),
        (keys::CONNECT_TOKEN_ERR, "获取连接令牌失败"),
        (keys::CLIENT_NOT_INSTALLED, "%s 协议客户端未安装"),
        (
            keys::PROTOCOL_UNSUPPORTED,
            "终端不支持 %s 协议，请使用 Web 终端访问",
        ),
        (keys::PROXY_CREATE_FAILED, "创建代理会话失败"),
        (
            keys::REVIEW_NEED_CONFIRM,
            "需要工单确认后才能登录，已发送邮件通知审批人",
        ),
        (keys::REVIEW_REVIEWERS, "工单审批人: %s"),
        (keys::REVIEW_DETAIL_URL, "可复制链接通知审批人: %s"),
        (keys::REVIEW_WAITING, "请等待审批人确认，输入 q 退出。"),
        (keys::TICKET_REJECTED, "工单已拒绝"),
        (keys::TICKET_CLOSED, "工单已关闭"),
    ])
});

static JA: Lazy<Catalog> = Lazy::new(|| {
    HashMap::from([
        (keys::CORE_API_FAILED, "Core API の呼び出しに失敗しました"),
        (keys::ACL_REJECT, "ACL により拒否されました"),
        (keys::CONNECT_TOKEN_ERR, "接続トークンの取得に失敗しました"),
        (
            keys::CLIENT_NOT_INSTALLED,
            "%s プロトコルのクライアントがインストールされていません。",
        ),
        (
            keys::PROTOCOL_UNSUPPORTED,
            "ターミナルは %s プロトコルをサポートしていません。Web ターミナルを使用してください",
        ),
        (keys::PROXY_CREATE_FAILED, "プロキシセッションの作成に失敗しました"),
        (
            keys::REVIEW_NEED_CONFIRM,
            "ログインにはチケットの承認が必要です。承認者にメールを送信しました",
        ),
        (keys::REVIEW_REVIEWERS, "チケット承認者: %s"),
        (keys::REVIEW_DETAIL_URL, "URL をコピーして承認者に通知できます: %s"),
        (
            keys::REVIEW_WAITING,
            "承認者の確認をお待ちください。q を入力すると終了します。",
        ),
        (keys::TICKET_REJECTED, "チケットは拒否されました"),
        (keys::TICKET_CLOSED, "チケットはクローズされました"),
    ])
});

/// Translates message keys into one language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Localizer {
    language: Language,
}

impl Localizer {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Looks up `key`, falling back to the key itself.
    pub fn t(&self, key: &str) -> String {
        let catalog: Option<&Catalog> = match self.language {
            Language::En => None,
            Language::Zh => Some(&ZH),
            Language::Ja => Some(&JA),
        };
        catalog
            .and_then(|c| c.get(key))
            .copied()
            .unwrap_or(key)
            .to_string()
    }

    /// Looks up `key` and fills each `%s` with the next argument.
    ///
    /// Surplus placeholders are left in place.
    pub fn tf(&self, key: &str, args: &[&str]) -> String {
        let template = self.t(key);
        let mut out = String::with_capacity(template.len());
        let mut args = args.iter();
        let mut rest = template.as_str();
        while let Some(pos) = rest.find("%s") {
            out.push_str(&rest[..pos]);
            match args.next() {
                Some(arg) => out.push_str(arg),
                None => out.push_str("%s"),
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

use crate::config::PluginConfig;
use crate::platform::ChatEvent;

/// Full-message trigger kept from older releases. Compared against the whole
/// plain text rather than the prefix-stripped remainder.
pub const LEGACY_DAILY_TRIGGER: &str = "#pixiv日榜";

const HELP_WORDS: [&str; 2] = ["help", "帮助"];
const DAILY_WORDS: [&str; 2] = ["日榜", "daily"];
const RECOMMEND_WORDS: [&str; 2] = ["rec", "推荐"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Recommend,
    DailyRanking,
    Search { query: String },
    None,
}

/// Turn an inbound event into a command. Pure function of event and config.
pub fn parse(event: &ChatEvent, config: &PluginConfig) -> Command {
    if !event.is_message() || !config.enabled {
        return Command::None;
    }
    parse_text(&event.plain_text(), config.prefix())
}

pub fn parse_text(text: &str, prefix: &str) -> Command {
    let text = text.trim();
    if text.is_empty() {
        return Command::None;
    }
    let Some(rest) = text.strip_prefix(prefix) else {
        return Command::None;
    };

    let remainder = rest.trim();
    if remainder.is_empty() {
        return Command::Help;
    }

    let normalized: String = remainder
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    if HELP_WORDS.contains(&normalized.as_str()) {
        Command::Help
    } else if DAILY_WORDS.contains(&normalized.as_str()) || text == LEGACY_DAILY_TRIGGER {
        Command::DailyRanking
    } else if RECOMMEND_WORDS.contains(&normalized.as_str()) {
        Command::Recommend
    } else {
        Command::Search {
            query: remainder.to_string(),
        }
    }
}

pub fn help_text(prefix: &str) -> String {
    [
        "Pixiv 插件帮助".to_string(),
        format!("{prefix}<关键词> - 搜索含有关键词的插画"),
        format!("{prefix}rec - 获取随机推荐插画"),
        format!("{prefix}推荐 - 获取随机推荐插画"),
        format!("{prefix}日榜 - 查看 Pixiv 每日排行"),
        format!("{prefix}help - 显示本帮助"),
    ]
    .join("\n")
}

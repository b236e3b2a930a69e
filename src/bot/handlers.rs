//! Command and message handlers.

use anyhow::Result;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::{InputFile, InputMedia, InputMediaPhoto, InputMediaVideo, ParseMode},
    utils::command::BotCommands,
};
use tracing::{info, warn};

use crate::config::{Settings, TG_CAPTION_LIMIT};
use crate::media::caption::{compose, CaptionPrefs, DescriptionMode};
use crate::media::model::{GroupItem, MediaDescriptor};
use crate::media::ParserRegistry;
use crate::utils::{create_http_client, truncate_caption};

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Start the bot and show welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Show usage help
    #[command(description = "Show help.")]
    Help,
    /// List supported media services
    #[command(description = "List supported media services.")]
    Sources,
    /// Show bot statistics
    #[command(description = "Show bot statistics.")]
    Stats,
}

/// Caption preferences for this deployment.
fn caption_prefs(settings: &Settings) -> CaptionPrefs {
    CaptionPrefs {
        description: DescriptionMode::from_config(&settings.caption_mode),
        author_mention: settings.caption_author,
        language_flag: settings.caption_flag,
        original_link: settings.caption_link,
    }
}

/// Handle the `/start` command.
///
/// # Errors
///
/// Returns an error if sending the reply fails.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(
        msg.chat.id,
        "Send me a link to a TikTok, Twitter, YouTube, Reddit or Instagram \
         post and I will reply with the media.",
    )
    .await?;
    Ok(())
}

/// Handle the `/help` command.
///
/// # Errors
///
/// Returns an error if sending the reply fails.
pub async fn help(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

/// Handle the `/sources` command: the read-only adapter listing.
///
/// # Errors
///
/// Returns an error if sending the reply fails.
pub async fn sources(bot: Bot, msg: Message, registry: Arc<ParserRegistry>) -> Result<()> {
    let lines: Vec<String> = registry
        .adapters()
        .iter()
        .map(|a| format!("• {}", a.kind()))
        .collect();
    bot.send_message(
        msg.chat.id,
        format!("Active services:\n{}", lines.join("\n")),
    )
    .await?;
    Ok(())
}

/// Handle the `/stats` command.
///
/// # Errors
///
/// Returns an error if sending the reply fails.
pub async fn stats(bot: Bot, msg: Message, registry: Arc<ParserRegistry>) -> Result<()> {
    let text = format!(
        "Resolved media: {}\nServed from cache: {}\nHot cache entries: {}",
        registry.resolved_total(),
        registry.cache_hits(),
        registry.cache().entry_count(),
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Handle a plain text message: resolve every recognized link and reply
/// with the media.
///
/// # Errors
///
/// Returns an error only on a defect; per-descriptor send failures are
/// logged and skipped.
pub async fn handle_text(
    bot: Bot,
    msg: Message,
    registry: Arc<ParserRegistry>,
    settings: Arc<Settings>,
) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    // One HTTP client per incoming request, shared across the adapters
    // of this parse call and released when the handler returns.
    let client = create_http_client(settings.adapter_timeout());
    let descriptors = registry.parse(&client, &[text]).await;

    if descriptors.is_empty() {
        // Groups stay quiet on unrecognized chatter
        if msg.chat.is_private() && text.contains("://") {
            bot.send_message(msg.chat.id, "Nothing found for that link.")
                .await?;
        }
        return Ok(());
    }

    info!(
        "Sending {} media item(s) to chat {}",
        descriptors.len(),
        msg.chat.id
    );
    let prefs = caption_prefs(&settings);
    for descriptor in descriptors {
        if let Err(e) = send_descriptor(&bot, &msg, &descriptor, &prefs).await {
            warn!(
                "Failed to deliver {} to chat {}: {}",
                descriptor.original_url(),
                msg.chat.id,
                e
            );
        }
    }
    Ok(())
}

/// Send one descriptor to the chat of `msg`.
async fn send_descriptor(
    bot: &Bot,
    msg: &Message,
    descriptor: &MediaDescriptor,
    prefs: &CaptionPrefs,
) -> Result<()> {
    let caption = truncate_caption(&compose(descriptor.meta(), prefs), TG_CAPTION_LIMIT);

    match descriptor {
        MediaDescriptor::Video(video) => {
            let file = InputFile::url(reqwest::Url::parse(&video.url)?);
            let mut request = bot.send_video(msg.chat.id, file);
            if !caption.is_empty() {
                request = request.caption(caption).parse_mode(ParseMode::Html);
            }
            if let (Some(width), Some(height)) = (video.width, video.height) {
                request = request.width(width).height(height);
            }
            request.await?;
        }
        MediaDescriptor::ImageSet(set) => {
            // Telegram albums take at most 10 items
            for (i, chunk) in set.images.chunks(10).enumerate() {
                let album: Vec<InputMedia> = chunk
                    .iter()
                    .filter_map(|url| reqwest::Url::parse(url).ok())
                    .enumerate()
                    .map(|(j, url)| {
                        let mut photo = InputMediaPhoto::new(InputFile::url(url));
                        if i == 0 && j == 0 && !caption.is_empty() {
                            photo = photo.caption(caption.clone()).parse_mode(ParseMode::Html);
                        }
                        InputMedia::Photo(photo)
                    })
                    .collect();
                if !album.is_empty() {
                    bot.send_media_group(msg.chat.id, album).await?;
                }
            }
        }
        MediaDescriptor::Audio(audio) => {
            let file = InputFile::url(reqwest::Url::parse(&audio.url)?);
            let mut request = bot.send_audio(msg.chat.id, file);
            if !caption.is_empty() {
                request = request.caption(caption).parse_mode(ParseMode::Html);
            }
            request.await?;
        }
        MediaDescriptor::Group(group) => {
            for chunk in group.items.chunks(10) {
                let album: Vec<InputMedia> = chunk
                    .iter()
                    .filter_map(|item| match item {
                        GroupItem::Photo { url } => reqwest::Url::parse(url)
                            .ok()
                            .map(|u| InputMedia::Photo(InputMediaPhoto::new(InputFile::url(u)))),
                        GroupItem::Video { url } => reqwest::Url::parse(url)
                            .ok()
                            .map(|u| InputMedia::Video(InputMediaVideo::new(InputFile::url(u)))),
                    })
                    .collect();
                if !album.is_empty() {
                    bot.send_media_group(msg.chat.id, album).await?;
                }
            }
        }
    }
    Ok(())
}

//! Message normalization and image pruning.
//!
//! Both transforms are pure functions over message lists so they can be
//! tested without a provider in the loop.

use kestrel_types::{ContentPart, Message, MessageContent};

use crate::family::ModelFamily;

/// Maximum number of image parts forwarded to the model in one call.
pub const MAX_IMAGES: usize = 19;

/// Normalize content shape for a provider family.
///
/// The Google family requires list-of-parts content; string content is
/// wrapped in a single text part. Other families accept both shapes and pass
/// through untouched.
pub fn normalize_for_family(messages: Vec<Message>, family: ModelFamily) -> Vec<Message> {
    if family != ModelFamily::Google {
        return messages;
    }

    messages
        .into_iter()
        .map(|mut msg| {
            msg.content = match msg.content.take() {
                Some(MessageContent::Text(text)) => {
                    Some(MessageContent::Parts(vec![ContentPart::text(text)]))
                }
                other => other,
            };
            msg
        })
        .collect()
}

/// Keep only the newest `max_images` image parts across the conversation.
///
/// Older image parts are dropped; non-image parts of the same message are
/// untouched. Messages with plain-string content never carry images and pass
/// through as-is.
pub fn prune_images(messages: Vec<Message>, max_images: usize) -> Vec<Message> {
    // Count images in order of appearance.
    let total: usize = messages
        .iter()
        .filter_map(|m| match &m.content {
            Some(MessageContent::Parts(parts)) => {
                Some(parts.iter().filter(|p| p.is_image()).count())
            }
            _ => None,
        })
        .sum();

    if total <= max_images {
        return messages;
    }

    // Everything before this ordinal gets dropped.
    let mut drop_remaining = total - max_images;

    messages
        .into_iter()
        .map(|mut msg| {
            if drop_remaining == 0 {
                return msg;
            }
            msg.content = match msg.content.take() {
                Some(MessageContent::Parts(parts)) => {
                    let kept: Vec<ContentPart> = parts
                        .into_iter()
                        .filter(|p| {
                            if p.is_image() && drop_remaining > 0 {
                                drop_remaining -= 1;
                                false
                            } else {
                                true
                            }
                        })
                        .collect();
                    Some(MessageContent::Parts(kept))
                }
                other => other,
            };
            msg
        })
        .collect()
}

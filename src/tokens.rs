//! Submission Tokens
//!
//! Placeholder substitution over a finalized submission, run once at submit
//! time for outbound notifications. Recognized tokens:
//!
//! - `[submission:values]` - every submitted value, grouped per contact
//! - `[submission:values:<element>]` / `[submission:values:<element>:raw]`
//! - `[submission:contact-id:<n>]` / `[submission:contact-link:<n>]`
//! - `[submission:<kind>-id:<n>]` - n-th linked record of a kind (1-based)
//!
//! Anything else, including tokens naming missing data, is left as written.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

use crate::config::CID_PLACEHOLDER;
use crate::definition::{FormDefinition, NotificationDef};
use crate::submission::{RenderedNotification, Submission};
use crate::types::{is_blank, SlotId};

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[submission:([^\[\]\s]+)\]").unwrap());

pub struct TokenRenderer<'a> {
    definition: &'a FormDefinition,
    submission: &'a Submission,
    link_template: &'a str,
}

impl<'a> TokenRenderer<'a> {
    pub fn new(
        definition: &'a FormDefinition,
        submission: &'a Submission,
        link_template: &'a str,
    ) -> Self {
        Self {
            definition,
            submission,
            link_template,
        }
    }

    pub fn render(&self, template: &str) -> String {
        TOKEN_RE
            .replace_all(template, |caps: &Captures| {
                self.resolve(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    pub fn render_notification(&self, notification: &NotificationDef) -> RenderedNotification {
        RenderedNotification {
            to: self.render(&notification.to),
            subject: self.render(&notification.subject),
            body: self.render(&notification.body),
        }
    }

    fn resolve(&self, token: &str) -> Option<String> {
        let parts: Vec<&str> = token.split(':').collect();
        match parts.as_slice() {
            ["values"] => Some(self.summary()),
            ["values", element] => self.value(element, false),
            ["values", element, "raw"] => self.value(element, true),
            ["contact-id", n] => self.contact_id(n).map(|id| id.to_string()),
            ["contact-link", n] => self.contact_link(n),
            [kind_id, n] => {
                let kind = kind_id.strip_suffix("-id")?;
                let index: usize = n.parse().ok()?;
                let ids = self.submission.linked.get(kind)?;
                ids.get(index.checked_sub(1)?).map(|id| id.to_string())
            }
            _ => None,
        }
    }

    fn value(&self, element: &str, raw: bool) -> Option<String> {
        let value = self.submission.values.get(element)?;
        if raw {
            return Some(value.clone());
        }
        // The selector element reads as the contact's name
        let name = self
            .definition
            .slots()
            .find(|s| s.existing_key() == element)
            .and_then(|def| self.submission.contact_names.get(&def.id()))
            .filter(|name| !is_blank(name));
        Some(name.unwrap_or(value).clone())
    }

    fn contact_id(&self, n: &str) -> Option<u64> {
        let slot = SlotId(n.parse().ok()?);
        self.submission.contacts.get(&slot).map(|c| c.0)
    }

    fn contact_link(&self, n: &str) -> Option<String> {
        let id = self.contact_id(n)?;
        let link = self
            .link_template
            .replace(CID_PLACEHOLDER, &id.to_string());
        Url::parse(&link).ok().map(|url| url.to_string())
    }

    fn summary(&self) -> String {
        let mut sections = Vec::new();
        for def in self.definition.slots() {
            let lines: Vec<String> = def
                .fields
                .iter()
                .filter_map(|f| {
                    let value = self.submission.values.get(&def.element_key(&f.key))?;
                    (!is_blank(value)).then(|| format!("{}: {}", f.display_label(), value.trim()))
                })
                .collect();
            if !lines.is_empty() {
                sections.push(format!("{}\n{}", def.label(), lines.join("\n")));
            }
        }
        sections.join("\n\n")
    }
}

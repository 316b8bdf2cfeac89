// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authorization policies.
//
// Handlers pick a policy; the checks below consult the authenticated
// username (from the HTTP layer) and the configured group table. A
// missing identity where one is required surfaces as HTTP 401, a group
// mismatch as HTTP 403 — neither carries an IPP body.

use std::sync::Arc;

use platen_core::config::ServerConfig;
use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_ipp::message::Message;
use platen_ipp::model::DelimiterTag;

use crate::printer::Printer;

/// Access rule applied at the top of each handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// No credentials needed (Get-Printer-Attributes, Validate-Job
    /// without a print group).
    Public,
    /// Per-user operations; identity captured but not gated unless the
    /// printer carries a print group.
    PrintGroup,
    /// Output-device (proxy) operations.
    ProxyGroup,
    /// Administrative operations.
    AdminGroup,
}

/// Enforce `policy` for `user` against `printer` (or the system when no
/// printer is in play).
pub fn authorize(
    config: &ServerConfig,
    user: Option<&str>,
    policy: Policy,
    printer: Option<&Arc<Printer>>,
) -> Result<()> {
    match policy {
        Policy::Public => Ok(()),
        Policy::PrintGroup => {
            let group = printer
                .and_then(|p| p.inner.read_lock().print_group.clone())
                .or_else(|| config.print_group.clone());
            match group {
                None => Ok(()),
                Some(group) => require_group(config, user, &group),
            }
        }
        Policy::ProxyGroup => {
            let group = printer
                .and_then(|p| p.inner.read_lock().proxy_group.clone())
                .or_else(|| config.proxy_group.clone());
            match group {
                None => match user {
                    Some(_) => Ok(()),
                    None => Err(PlatenError::Unauthorized),
                },
                Some(group) => require_group(config, user, &group),
            }
        }
        Policy::AdminGroup => match config.admin_group.clone() {
            None => match user {
                Some(_) => Ok(()),
                None => Err(PlatenError::Unauthorized),
            },
            Some(group) => require_group(config, user, &group),
        },
    }
}

fn require_group(config: &ServerConfig, user: Option<&str>, group: &str) -> Result<()> {
    match user {
        None => Err(PlatenError::Unauthorized),
        Some(user) => {
            if config.user_in_group(user, group) {
                Ok(())
            } else {
                Err(PlatenError::Forbidden)
            }
        }
    }
}

/// The identity a job or subscription is recorded under: the
/// authenticated user when present, otherwise the request's
/// `requesting-user-name`, otherwise `anonymous`.
pub fn effective_username(user: Option<&str>, msg: &Message) -> String {
    if let Some(user) = user {
        return user.to_string();
    }
    msg.find(DelimiterTag::OperationAttributes, "requesting-user-name")
        .and_then(|a| a.as_str())
        .unwrap_or("anonymous")
        .to_string()
}

/// Owner-or-admin gate for full job attribute visibility.
pub fn can_view_all(config: &ServerConfig, user: Option<&str>, msg: &Message, owner: &str) -> bool {
    let requester = effective_username(user, msg);
    if requester == owner {
        return true;
    }
    match (&config.admin_group, user) {
        (Some(group), Some(user)) => config.user_in_group(user, group),
        (None, Some(_)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_ipp::attr::Attribute;
    use platen_ipp::model::Operation;

    fn config_with_groups() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.print_group = Some("print".into());
        config.proxy_group = Some("proxy".into());
        config.admin_group = Some("admin".into());
        config.users.insert("alice".into(), vec!["print".into()]);
        config.users.insert("pru".into(), vec!["proxy".into()]);
        config.users.insert("root".into(), vec!["admin".into(), "print".into()]);
        config
    }

    #[test]
    fn public_needs_nothing() {
        let config = config_with_groups();
        assert!(authorize(&config, None, Policy::Public, None).is_ok());
    }

    #[test]
    fn print_group_gates_when_configured() {
        let config = config_with_groups();
        assert!(matches!(
            authorize(&config, None, Policy::PrintGroup, None),
            Err(PlatenError::Unauthorized)
        ));
        assert!(matches!(
            authorize(&config, Some("mallory"), Policy::PrintGroup, None),
            Err(PlatenError::Forbidden)
        ));
        assert!(authorize(&config, Some("alice"), Policy::PrintGroup, None).is_ok());
    }

    #[test]
    fn print_is_open_without_group() {
        let config = ServerConfig::default();
        assert!(authorize(&config, None, Policy::PrintGroup, None).is_ok());
    }

    #[test]
    fn proxy_and_admin_require_identity_even_without_group() {
        let config = ServerConfig::default();
        assert!(matches!(
            authorize(&config, None, Policy::ProxyGroup, None),
            Err(PlatenError::Unauthorized)
        ));
        assert!(authorize(&config, Some("anyone"), Policy::ProxyGroup, None).is_ok());
        assert!(matches!(
            authorize(&config, None, Policy::AdminGroup, None),
            Err(PlatenError::Unauthorized)
        ));
    }

    #[test]
    fn admin_group_membership() {
        let config = config_with_groups();
        assert!(authorize(&config, Some("root"), Policy::AdminGroup, None).is_ok());
        assert!(matches!(
            authorize(&config, Some("alice"), Policy::AdminGroup, None),
            Err(PlatenError::Forbidden)
        ));
    }

    #[test]
    fn effective_username_fallback_chain() {
        let mut msg = Message::request(Operation::PrintJob, 1);
        msg.add(
            DelimiterTag::OperationAttributes,
            Attribute::name_value("requesting-user-name", "bob"),
        );
        assert_eq!(effective_username(Some("alice"), &msg), "alice");
        assert_eq!(effective_username(None, &msg), "bob");
        let empty = Message::request(Operation::PrintJob, 2);
        assert_eq!(effective_username(None, &empty), "anonymous");
    }

    #[test]
    fn owner_or_admin_visibility() {
        let config = config_with_groups();
        let mut msg = Message::request(Operation::GetJobAttributes, 1);
        msg.add(
            DelimiterTag::OperationAttributes,
            Attribute::name_value("requesting-user-name", "bob"),
        );
        assert!(can_view_all(&config, None, &msg, "bob"));
        assert!(!can_view_all(&config, None, &msg, "alice"));
        assert!(can_view_all(&config, Some("root"), &msg, "alice"));
    }
}

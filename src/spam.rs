use std::collections::HashSet;

use crate::config::SpamConfig;

/// Which rule flagged a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamReason {
    BlockedSender,
    BlockedDomain,
    Keyword,
}

/// Static blocklist classifier. Rules run in order and the first hit wins.
#[derive(Debug, Clone)]
pub struct SpamClassifier {
    blocked_senders: HashSet<String>,
    blocked_domains: Vec<String>,
    keywords: Vec<String>,
    check_domains: bool,
}

impl SpamClassifier {
    pub fn new(config: &SpamConfig) -> Self {
        let lower = |values: &[String]| -> Vec<String> {
            values
                .iter()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect()
        };

        Self {
            blocked_senders: lower(&config.blocked_senders).into_iter().collect(),
            blocked_domains: lower(&config.blocked_domains),
            keywords: lower(&config.keywords),
            check_domains: config.check_domains,
        }
    }

    pub fn classify(&self, sender: &str, subject: &str, body: &str) -> Option<SpamReason> {
        let sender = sender.trim().to_lowercase();
        if self.blocked_senders.contains(&sender) {
            return Some(SpamReason::BlockedSender);
        }

        if self.check_domains
            && self
                .blocked_domains
                .iter()
                .any(|domain| sender.ends_with(domain.as_str()))
        {
            return Some(SpamReason::BlockedDomain);
        }

        let subject = subject.to_lowercase();
        let body = body.to_lowercase();
        if self
            .keywords
            .iter()
            .any(|k| subject.contains(k.as_str()) || body.contains(k.as_str()))
        {
            return Some(SpamReason::Keyword);
        }

        None
    }

    pub fn is_spam(&self, sender: &str, subject: &str, body: &str) -> bool {
        self.classify(sender, subject, body).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(check_domains: bool) -> SpamConfig {
        SpamConfig {
            blocked_senders: vec!["Deals@Example.com".to_string()],
            blocked_domains: vec![".promo".to_string()],
            keywords: vec!["unsubscribe".to_string(), "discount".to_string()],
            check_domains,
        }
    }

    #[test]
    fn test_blocked_sender_dominates_body() {
        let classifier = SpamClassifier::new(&policy(false));
        for body in ["", "quarterly cabinet order", "UNSUBSCRIBE here"] {
            assert_eq!(
                classifier.classify("deals@example.com", "hi", body),
                Some(SpamReason::BlockedSender)
            );
        }
    }

    #[test]
    fn test_domain_rule_is_a_policy_switch() {
        let without = SpamClassifier::new(&policy(false));
        let with = SpamClassifier::new(&policy(true));
        assert!(!without.is_spam("news@shop.promo", "Hello", "Order status"));
        assert_eq!(
            with.classify("news@shop.promo", "Hello", "Order status"),
            Some(SpamReason::BlockedDomain)
        );
    }

    #[test]
    fn test_keywords_match_subject_or_body() {
        let classifier = SpamClassifier::new(&policy(false));
        assert_eq!(
            classifier.classify("a@b.com", "Big DISCOUNT", ""),
            Some(SpamReason::Keyword)
        );
        assert!(classifier.is_spam("a@b.com", "", "click to Unsubscribe"));
        assert!(!classifier.is_spam("a@b.com", "Door sizes", "Need the measurements"));
    }
}

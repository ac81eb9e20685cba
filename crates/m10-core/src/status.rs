//! Maps the feed's free-text invoice status onto [`InvoiceStatus`].
//!
//! Matching is forgiving: case, accents, spaces and dashes are folded, exact
//! matches win over substring matches, and anything unrecognized becomes
//! [`InvoiceStatus::Other`]. The raw text is always kept next to the mapped
//! value, so nothing is lost here.

use serde::{Deserialize, Serialize};

use crate::InvoiceStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRule {
    pub status: InvoiceStatus,
    #[serde(default)]
    pub equals_any: Vec<String>,
    #[serde(default)]
    pub contains_any: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRuleSet {
    #[serde(default = "default_blank_status")]
    pub blank_status: InvoiceStatus,
    #[serde(default)]
    pub rules: Vec<StatusRule>,
}

fn default_blank_status() -> InvoiceStatus {
    InvoiceStatus::Unpaid
}

impl Default for StatusRuleSet {
    fn default() -> Self {
        fn rule(status: InvoiceStatus, equals: &[&str], contains: &[&str]) -> StatusRule {
            StatusRule {
                status,
                equals_any: equals.iter().map(|s| s.to_string()).collect(),
                contains_any: contains.iter().map(|s| s.to_string()).collect(),
            }
        }

        // Order matters for substring matching: "NAO_PAGO" must be seen
        // before "PAGO".
        Self {
            blank_status: default_blank_status(),
            rules: vec![
                rule(
                    InvoiceStatus::Paid,
                    &["PAGA", "PAGO", "PAGA_AGUARDANDO_REPASSE", "AJUSTADA", "QUITADO", "QUITADA"],
                    &[],
                ),
                rule(
                    InvoiceStatus::Unpaid,
                    &["NAO_PAGO", "NAO_PAGA", "ABERTO", "ABERTA", "AGUARDANDO_ARRECADACAO", "ERRO_NAO_RECOBRAVEL"],
                    &["NAO_PAG", "ABERT", "EM_ABERTO"],
                ),
                rule(InvoiceStatus::Late, &["VENCIDO", "VENCIDA", "ATRASADO", "ATRASADA"], &["VENCID", "ATRASAD"]),
                rule(InvoiceStatus::Awaiting, &["AGUARDANDO"], &["AGUARDANDO"]),
                rule(InvoiceStatus::Paid, &[], &["QUITAD", "PAGO", "PAGA"]),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusNormalizer {
    blank_status: InvoiceStatus,
    exact: Vec<(String, InvoiceStatus)>,
    contains: Vec<(String, InvoiceStatus)>,
}

impl Default for StatusNormalizer {
    fn default() -> Self {
        Self::new(StatusRuleSet::default())
    }
}

impl StatusNormalizer {
    pub fn new(rules: StatusRuleSet) -> Self {
        let mut exact = Vec::new();
        let mut contains = Vec::new();
        for rule in rules.rules {
            exact.extend(rule.equals_any.iter().map(|t| (fold_key(t), rule.status)));
            contains.extend(rule.contains_any.iter().map(|t| (fold_key(t), rule.status)));
        }
        exact.retain(|(k, _)| !k.is_empty());
        contains.retain(|(k, _)| !k.is_empty());
        Self {
            blank_status: rules.blank_status,
            exact,
            contains,
        }
    }

    pub fn normalize(&self, raw: Option<&str>) -> InvoiceStatus {
        let key = raw.map(fold_key).unwrap_or_default();
        if key.is_empty() {
            return self.blank_status;
        }
        if let Some((_, status)) = self.exact.iter().find(|(k, _)| *k == key) {
            return *status;
        }
        self.contains
            .iter()
            .find(|(needle, _)| key.contains(needle.as_str()))
            .map(|(_, status)| *status)
            .unwrap_or(InvoiceStatus::Other)
    }
}

/// Uppercase, strip Portuguese diacritics, and join words with `_`.
pub fn fold_key(raw: &str) -> String {
    let folded: String = raw
        .trim()
        .chars()
        .flat_map(char::to_uppercase)
        .map(|c| match c {
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'Ç' => 'C',
            c if c.is_whitespace() || c == '-' => '_',
            c => c,
        })
        .collect();

    folded
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_vocabulary_maps_onto_closed_set() {
        let n = StatusNormalizer::default();
        assert_eq!(n.normalize(Some("Paga")), InvoiceStatus::Paid);
        assert_eq!(n.normalize(Some("PAGA_AGUARDANDO_REPASSE")), InvoiceStatus::Paid);
        assert_eq!(n.normalize(Some("Ajustada")), InvoiceStatus::Paid);
        assert_eq!(n.normalize(Some("Aguardando_arrecadacao")), InvoiceStatus::Unpaid);
        assert_eq!(n.normalize(Some("ERRO_NAO_RECOBRAVEL")), InvoiceStatus::Unpaid);
        assert_eq!(n.normalize(Some("ABERTO")), InvoiceStatus::Unpaid);
        assert_eq!(n.normalize(Some("vencido")), InvoiceStatus::Late);
        assert_eq!(n.normalize(Some("AGUARDANDO")), InvoiceStatus::Awaiting);
    }

    #[test]
    fn substring_matching_respects_negation() {
        let n = StatusNormalizer::default();
        assert_eq!(n.normalize(Some("Não Pago")), InvoiceStatus::Unpaid);
        assert_eq!(n.normalize(Some("fatura em aberto")), InvoiceStatus::Unpaid);
        assert_eq!(n.normalize(Some("Título quitado em cartório")), InvoiceStatus::Paid);
        assert_eq!(n.normalize(Some("VENCIDA HA 10 DIAS")), InvoiceStatus::Late);
        assert_eq!(n.normalize(Some("aguardando banco")), InvoiceStatus::Awaiting);
    }

    #[test]
    fn unknown_text_is_other_and_blank_is_unpaid() {
        let n = StatusNormalizer::default();
        assert_eq!(n.normalize(Some("CONTESTADA")), InvoiceStatus::Other);
        assert_eq!(n.normalize(Some("   ")), InvoiceStatus::Unpaid);
        assert_eq!(n.normalize(None), InvoiceStatus::Unpaid);
    }

    #[test]
    fn custom_rules_replace_the_builtin_table() {
        let n = StatusNormalizer::new(StatusRuleSet {
            blank_status: InvoiceStatus::Other,
            rules: vec![StatusRule {
                status: InvoiceStatus::Late,
                equals_any: vec!["em atraso".into()],
                contains_any: vec![],
            }],
        });
        assert_eq!(n.normalize(Some("EM-ATRASO")), InvoiceStatus::Late);
        assert_eq!(n.normalize(Some("PAGO")), InvoiceStatus::Other);
        assert_eq!(n.normalize(None), InvoiceStatus::Other);
    }

    #[test]
    fn fold_key_collapses_separators() {
        assert_eq!(fold_key("  não   pago - já "), "NAO_PAGO_JA");
    }
}

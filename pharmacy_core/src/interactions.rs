//! Medicine interaction and contraindication lookups.
//!
//! The reference data (medicine pairs, contraindicated conditions, age limits
//! and allergy cross-reactivity classes) is turned into keyed maps once, when
//! the table is built. Checks are plain lookups against those maps.

use crate::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Cached built-in table
static DEFAULT_TABLE: Lazy<InteractionTable> = Lazy::new(|| {
    InteractionTable::from_reference(default_reference())
        .expect("built-in interaction reference is valid")
});

/// Get a reference to the cached built-in table
pub fn default_table() -> &'static InteractionTable {
    &DEFAULT_TABLE
}

// ============================================================================
// Reference document
// ============================================================================

/// Warning severity; `High` sorts first when displayed
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Two medicines that should not be combined
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InteractionEntry {
    pub medicines: [String; 2],
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Contraindication {
    pub medicine: String,
    pub conditions: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgeRule {
    pub medicine: String,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub severity: Severity,
    pub warning: String,
}

/// Medicines that cross-react with an allergy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AllergyClass {
    pub allergy: String,
    pub medicines: Vec<String>,
}

/// On-disk form of the interaction reference data (`interactions.json`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct InteractionReference {
    pub interactions: Vec<InteractionEntry>,
    #[serde(default)]
    pub contraindications: Vec<Contraindication>,
    #[serde(default)]
    pub age_rules: Vec<AgeRule>,
    #[serde(default)]
    pub allergy_classes: Vec<AllergyClass>,
}

// ============================================================================
// Warnings
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Interaction,
    Contraindication,
    Age,
    Allergy,
}

impl WarningKind {
    pub fn label(&self) -> &'static str {
        match self {
            WarningKind::Interaction => "interaction",
            WarningKind::Contraindication => "contraindication",
            WarningKind::Age => "age warning",
            WarningKind::Allergy => "allergy warning",
        }
    }
}

/// A single safety finding
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Warning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub medicines: Vec<String>,
    pub description: String,
    pub recommendation: String,
    /// Position of the originating entry in the reference table
    #[serde(skip)]
    order: usize,
}

impl Warning {
    /// Whether the warning names the given medicine (case-insensitive)
    pub fn involves(&self, medicine: &str) -> bool {
        let key = normalize(medicine);
        self.medicines.iter().any(|m| normalize(m) == key)
    }
}

/// Summary of a full safety check
#[derive(Clone, Debug, Serialize)]
pub struct SafetyReport {
    pub is_safe: bool,
    pub high_risk_count: usize,
    pub total_warnings: usize,
    pub warnings: Vec<Warning>,
}

impl SafetyReport {
    pub fn from_warnings(warnings: Vec<Warning>) -> Self {
        let high_risk_count = warnings
            .iter()
            .filter(|w| w.severity == Severity::High)
            .count();
        Self {
            is_safe: high_risk_count == 0,
            high_risk_count,
            total_warnings: warnings.len(),
            warnings,
        }
    }
}

// ============================================================================
// Keyed table
// ============================================================================

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    let (a, b) = (normalize(a), normalize(b));
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Interaction lookups keyed by normalized medicine names
#[derive(Clone, Debug)]
pub struct InteractionTable {
    pairs: HashMap<(String, String), (usize, InteractionEntry)>,
    contraindications: HashMap<String, Vec<(usize, String)>>,
    age_rules: HashMap<String, Vec<(usize, AgeRule)>>,
    allergy_classes: HashMap<String, (usize, AllergyClass)>,
    next_order: usize,
}

impl InteractionTable {
    /// Build the keyed maps, assigning each entry its insertion order
    pub fn from_reference(reference: InteractionReference) -> Result<Self> {
        let mut order = 0usize;
        let mut pairs = HashMap::new();
        for entry in reference.interactions {
            let [a, b] = &entry.medicines;
            if a.trim().is_empty() || b.trim().is_empty() {
                return Err(Error::Config(
                    "interaction entry with an empty medicine name".into(),
                ));
            }
            let key = pair_key(a, b);
            if key.0 == key.1 {
                return Err(Error::Config(format!(
                    "interaction entry pairs '{}' with itself",
                    a
                )));
            }
            if pairs.contains_key(&key) {
                tracing::debug!("Ignoring duplicate interaction entry {} / {}", a, b);
                continue;
            }
            pairs.insert(key, (order, entry));
            order += 1;
        }

        let mut contraindications: HashMap<String, Vec<(usize, String)>> = HashMap::new();
        for item in reference.contraindications {
            let slot = contraindications.entry(normalize(&item.medicine)).or_default();
            for condition in item.conditions {
                slot.push((order, condition));
                order += 1;
            }
        }

        let mut age_rules: HashMap<String, Vec<(usize, AgeRule)>> = HashMap::new();
        for rule in reference.age_rules {
            if rule.min_age.is_none() && rule.max_age.is_none() {
                return Err(Error::Config(format!(
                    "age rule for '{}' has neither min_age nor max_age",
                    rule.medicine
                )));
            }
            age_rules
                .entry(normalize(&rule.medicine))
                .or_default()
                .push((order, rule));
            order += 1;
        }

        let mut allergy_classes = HashMap::new();
        for class in reference.allergy_classes {
            allergy_classes.insert(normalize(&class.allergy), (order, class));
            order += 1;
        }

        tracing::debug!(
            pairs = pairs.len(),
            contraindicated = contraindications.len(),
            age_rules = age_rules.len(),
            allergy_classes = allergy_classes.len(),
            "Built interaction table"
        );

        Ok(Self {
            pairs,
            contraindications,
            age_rules,
            allergy_classes,
            next_order: order,
        })
    }

    /// Load `path` if it exists, otherwise use the built-in reference
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No interaction reference at {:?}, using built-in table", path);
            return Ok(default_table().clone());
        }
        let contents = std::fs::read_to_string(path)?;
        let reference: InteractionReference = serde_json::from_str(&contents)?;
        tracing::info!("Loaded interaction reference from {:?}", path);
        Self::from_reference(reference)
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Symmetric lookup of a single pair
    pub fn lookup(&self, a: &str, b: &str) -> Option<&InteractionEntry> {
        self.pairs.get(&pair_key(a, b)).map(|(_, entry)| entry)
    }

    /// Run every check for a set of medicines and a patient profile
    ///
    /// Duplicate names (ignoring case) are treated as one medicine. Results
    /// are ordered by severity, then by position in the reference table.
    pub fn check<M, A, C>(
        &self,
        medicine_names: &[M],
        allergies: &[A],
        conditions: &[C],
        age: Option<u32>,
    ) -> Vec<Warning>
    where
        M: AsRef<str>,
        A: AsRef<str>,
        C: AsRef<str>,
    {
        let mut medicines: BTreeMap<String, &str> = BTreeMap::new();
        for name in medicine_names {
            let name = name.as_ref();
            if !name.trim().is_empty() {
                medicines.entry(normalize(name)).or_insert(name.trim());
            }
        }
        let allergies: Vec<String> = allergies.iter().map(|a| normalize(a.as_ref())).collect();
        let conditions: Vec<String> = conditions.iter().map(|c| normalize(c.as_ref())).collect();

        let mut warnings = Vec::new();
        let keys: Vec<&String> = medicines.keys().collect();

        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                if let Some((order, entry)) = self.pairs.get(&pair_key(a, b)) {
                    warnings.push(Warning {
                        kind: WarningKind::Interaction,
                        severity: entry.severity,
                        medicines: entry.medicines.to_vec(),
                        description: entry.description.clone(),
                        recommendation: entry.recommendation.clone(),
                        order: *order,
                    });
                }
            }
        }

        for (key, display) in &medicines {
            self.check_contraindications(key, display, &conditions, &mut warnings);
            if let Some(age) = age {
                self.check_age(key, display, age, &mut warnings);
            }
            self.check_allergies(key, display, &allergies, &mut warnings);
        }

        warnings.sort_by(|x, y| y.severity.cmp(&x.severity).then(x.order.cmp(&y.order)));
        warnings
    }

    /// `check` wrapped into a summary
    pub fn assess<M, A, C>(
        &self,
        medicine_names: &[M],
        allergies: &[A],
        conditions: &[C],
        age: Option<u32>,
    ) -> SafetyReport
    where
        M: AsRef<str>,
        A: AsRef<str>,
        C: AsRef<str>,
    {
        SafetyReport::from_warnings(self.check(medicine_names, allergies, conditions, age))
    }

    fn check_contraindications(
        &self,
        key: &str,
        display: &str,
        conditions: &[String],
        warnings: &mut Vec<Warning>,
    ) {
        let Some(listed) = self.contraindications.get(key) else {
            return;
        };
        for (order, condition) in listed {
            if conditions.contains(&normalize(condition)) {
                warnings.push(Warning {
                    kind: WarningKind::Contraindication,
                    severity: Severity::High,
                    medicines: vec![display.to_string()],
                    description: format!(
                        "{} is contraindicated in patients with {}",
                        display, condition
                    ),
                    recommendation: "Consider alternative medication or specialist consultation"
                        .into(),
                    order: *order,
                });
            }
        }
    }

    fn check_age(&self, key: &str, display: &str, age: u32, warnings: &mut Vec<Warning>) {
        let Some(rules) = self.age_rules.get(key) else {
            return;
        };
        for (order, rule) in rules {
            let recommendation = match (rule.min_age, rule.max_age) {
                (Some(min), _) if age < min => {
                    format!("Not recommended for patients under {} years", min)
                }
                (_, Some(max)) if age > max => {
                    format!("Use with caution in patients over {} years", max)
                }
                _ => continue,
            };
            warnings.push(Warning {
                kind: WarningKind::Age,
                severity: rule.severity,
                medicines: vec![display.to_string()],
                description: rule.warning.clone(),
                recommendation,
                order: *order,
            });
        }
    }

    fn check_allergies(
        &self,
        key: &str,
        display: &str,
        allergies: &[String],
        warnings: &mut Vec<Warning>,
    ) {
        for allergy in allergies {
            if allergy == key {
                warnings.push(Warning {
                    kind: WarningKind::Allergy,
                    severity: Severity::High,
                    medicines: vec![display.to_string()],
                    description: format!("Patient is allergic to {}", display),
                    recommendation: "Do not dispense this medication".into(),
                    order: self.next_order,
                });
                continue;
            }
            let Some((order, class)) = self.allergy_classes.get(allergy) else {
                continue;
            };
            if class.medicines.iter().any(|m| normalize(m) == key) {
                warnings.push(Warning {
                    kind: WarningKind::Allergy,
                    severity: Severity::High,
                    medicines: vec![display.to_string()],
                    description: format!(
                        "Patient has {} allergy - {} may cause cross-reactivity",
                        class.allergy, display
                    ),
                    recommendation: "Avoid this medication due to potential allergic reaction"
                        .into(),
                    order: *order,
                });
            }
        }
    }
}

/// Write a reference document as pretty JSON (e.g. to seed `interactions.json`)
pub fn write_reference(path: &Path, reference: &InteractionReference) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(reference)?)?;
    tracing::info!("Wrote interaction reference to {:?}", path);
    Ok(())
}

// ============================================================================
// Built-in reference data
// ============================================================================

fn pair(a: &str, b: &str, severity: Severity, description: &str, recommendation: &str) -> InteractionEntry {
    InteractionEntry {
        medicines: [a.into(), b.into()],
        severity,
        description: description.into(),
        recommendation: recommendation.into(),
    }
}

fn contra(medicine: &str, conditions: &[&str]) -> Contraindication {
    Contraindication {
        medicine: medicine.into(),
        conditions: conditions.iter().map(|c| c.to_string()).collect(),
    }
}

fn allergy(allergy: &str, medicines: &[&str]) -> AllergyClass {
    AllergyClass {
        allergy: allergy.into(),
        medicines: medicines.iter().map(|m| m.to_string()).collect(),
    }
}

/// Common interactions shipped with the application
pub fn default_reference() -> InteractionReference {
    use Severity::{High, Medium};

    let interactions = vec![
        pair("Warfarin", "Amoxicillin", High,
            "Increased risk of bleeding due to reduced Warfarin metabolism",
            "Monitor INR closely and adjust Warfarin dose"),
        pair("Warfarin", "Ibuprofen", High,
            "Significantly increased risk of bleeding and stomach ulcers",
            "Avoid combination or use alternative pain relief"),
        pair("Warfarin", "Aspirin", High,
            "Dangerously increased risk of bleeding",
            "Contraindicated - avoid combination"),
        pair("Ibuprofen", "Aspirin", Medium,
            "Increased risk of stomach bleeding and ulcers",
            "Use with caution, consider gastroprotection"),
        pair("Ibuprofen", "Lisinopril", Medium,
            "May reduce the blood pressure lowering effects of Lisinopril",
            "Monitor blood pressure closely"),
        pair("Digoxin", "Amoxicillin", Medium,
            "May increase Digoxin levels and risk of toxicity",
            "Monitor Digoxin levels and watch for signs of toxicity"),
        pair("Digoxin", "Omeprazole", Medium,
            "May increase Digoxin absorption and levels",
            "Monitor Digoxin levels closely"),
        pair("Lithium", "Ibuprofen", High,
            "NSAIDs can increase Lithium levels leading to toxicity",
            "Avoid combination or monitor Lithium levels very closely"),
        pair("Lithium", "Lisinopril", Medium,
            "ACE inhibitors may increase Lithium levels",
            "Monitor Lithium levels and kidney function"),
        pair("Methotrexate", "Ibuprofen", High,
            "NSAIDs can increase Methotrexate toxicity",
            "Avoid NSAIDs during Methotrexate treatment"),
        pair("Methotrexate", "Aspirin", High,
            "May increase Methotrexate toxicity",
            "Use with extreme caution or avoid"),
        pair("Omeprazole", "Clopidogrel", High,
            "May reduce the effectiveness of Clopidogrel",
            "Consider alternative acid suppression therapy"),
        pair("Simvastatin", "Amoxicillin", Medium,
            "May increase risk of muscle toxicity",
            "Monitor for muscle pain and weakness"),
        pair("Simvastatin", "Clarithromycin", High,
            "Significantly increased risk of muscle toxicity and rhabdomyolysis",
            "Contraindicated - avoid combination"),
        pair("Prednisone", "Ibuprofen", Medium,
            "Increased risk of stomach ulcers and bleeding",
            "Use gastroprotection and monitor closely"),
        pair("Prednisone", "Aspirin", High,
            "Significantly increased risk of stomach ulcers and bleeding",
            "Avoid combination or use alternative pain relief"),
    ];

    let contraindications = vec![
        contra("Warfarin", &["Recent surgery", "Active bleeding", "Severe hypertension", "Pregnancy (first trimester)"]),
        contra("Amoxicillin", &["History of severe allergic reaction to penicillin", "Infectious mononucleosis"]),
        contra("Ibuprofen", &["Active stomach ulcer", "Severe heart failure", "Third trimester pregnancy", "Severe kidney impairment"]),
        contra("Aspirin", &["Children under 16 with viral infections", "Active stomach ulcer", "Bleeding disorders", "Severe liver impairment"]),
        contra("Digoxin", &["Heart block", "Severe bradycardia", "Hypokalemia"]),
        contra("Lithium", &["Severe kidney impairment", "Dehydration", "Heart disease"]),
        contra("Methotrexate", &["Pregnancy", "Severe kidney impairment", "Severe liver impairment", "Active infection"]),
        contra("Omeprazole", &["Severe liver impairment"]),
    ];

    let age_rules = vec![
        AgeRule {
            medicine: "Aspirin".into(),
            min_age: Some(16),
            max_age: None,
            severity: High,
            warning: "Not recommended for children under 16 due to risk of Reye's syndrome".into(),
        },
        AgeRule {
            medicine: "Warfarin".into(),
            min_age: Some(18),
            max_age: None,
            severity: High,
            warning: "Dosing is not established for patients under 18".into(),
        },
        AgeRule {
            medicine: "Ibuprofen".into(),
            min_age: None,
            max_age: Some(65),
            severity: Medium,
            warning: "Use with caution in elderly patients - increased risk of side effects".into(),
        },
    ];

    let allergy_classes = vec![
        allergy("Penicillin", &["Amoxicillin", "Ampicillin", "Dicloxacillin"]),
        allergy("Aspirin", &["Ibuprofen", "Naproxen"]),
        allergy("Sulfa", &["Sulfamethoxazole", "Sulfasalazine"]),
    ];

    InteractionReference {
        interactions,
        contraindications,
        age_rules,
        allergy_classes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: &[&str] = &[];

    #[test]
    fn test_default_table_builds() {
        assert_eq!(default_table().pair_count(), 16);
    }

    #[test]
    fn test_lookup_is_symmetric() {
        let table = default_table();
        let forward = table.lookup("Warfarin", "Aspirin").unwrap();
        let backward = table.lookup("aspirin", "WARFARIN").unwrap();
        assert_eq!(forward, backward);
        assert!(table.lookup("Paracetamol", "Aspirin").is_none());
    }

    #[test]
    fn test_check_order_independent() {
        let table = default_table();
        let ab = table.check(&["Warfarin", "Ibuprofen", "Aspirin"], NONE, NONE, None);
        let ba = table.check(&["Aspirin", "Ibuprofen", "Warfarin"], NONE, NONE, None);
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 3);
    }

    #[test]
    fn test_severity_then_table_order() {
        let table = default_table();
        let warnings = table.check(&["Aspirin", "Ibuprofen", "Warfarin"], NONE, NONE, None);
        let severities: Vec<_> = warnings.iter().map(|w| w.severity).collect();
        assert_eq!(severities, vec![Severity::High, Severity::High, Severity::Medium]);
        // Warfarin/Ibuprofen precedes Warfarin/Aspirin in the reference table
        assert_eq!(warnings[0].medicines, vec!["Warfarin", "Ibuprofen"]);
        assert_eq!(warnings[1].medicines, vec!["Warfarin", "Aspirin"]);
    }

    #[test]
    fn test_duplicate_names_count_once() {
        let table = default_table();
        let warnings = table.check(&["Warfarin", "warfarin", "Aspirin"], NONE, NONE, None);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_contraindication_and_allergy() {
        let table = default_table();
        let warnings = table.check(
            &["Amoxicillin"],
            &["penicillin"],
            &["Infectious Mononucleosis"],
            None,
        );
        let kinds: Vec<_> = warnings.iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&WarningKind::Contraindication));
        assert!(kinds.contains(&WarningKind::Allergy));
        assert!(warnings.iter().all(|w| w.severity == Severity::High));
    }

    #[test]
    fn test_direct_allergy() {
        let table = default_table();
        let warnings = table.check(&["Paracetamol"], &["Paracetamol"], NONE, None);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::Allergy);
    }

    #[test]
    fn test_age_thresholds() {
        let table = default_table();
        assert_eq!(table.check(&["Aspirin"], NONE, NONE, Some(12)).len(), 1);
        assert!(table.check(&["Aspirin"], NONE, NONE, Some(30)).is_empty());
        assert!(table.check(&["Aspirin"], NONE, NONE, None).is_empty());

        let elderly = table.check(&["Ibuprofen"], NONE, NONE, Some(80));
        assert_eq!(elderly.len(), 1);
        assert_eq!(elderly[0].severity, Severity::Medium);
    }

    #[test]
    fn test_assess_summary() {
        let report = default_table().assess(&["Warfarin", "Aspirin", "Ibuprofen"], NONE, NONE, None);
        assert!(!report.is_safe);
        assert_eq!(report.high_risk_count, 2);
        assert_eq!(report.total_warnings, 3);

        let clean = default_table().assess(&["Paracetamol"], NONE, NONE, Some(40));
        assert!(clean.is_safe);
    }

    #[test]
    fn test_reference_file_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("interactions.json");

        let reference = InteractionReference {
            interactions: vec![pair("Alpha", "Beta", Severity::Low, "mild", "watch")],
            ..Default::default()
        };
        write_reference(&path, &reference).unwrap();

        let table = InteractionTable::load_or_default(&path).unwrap();
        assert_eq!(table.pair_count(), 1);
        assert_eq!(table.lookup("beta", "alpha").unwrap().severity, Severity::Low);
    }

    #[test]
    fn test_missing_reference_uses_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let table = InteractionTable::load_or_default(&temp_dir.path().join("none.json")).unwrap();
        assert_eq!(table.pair_count(), default_table().pair_count());
    }

    #[test]
    fn test_self_pair_rejected() {
        let reference = InteractionReference {
            interactions: vec![pair("Alpha", "alpha", Severity::Low, "x", "y")],
            ..Default::default()
        };
        assert!(InteractionTable::from_reference(reference).is_err());
    }
}

use crate::models::SectionResult;

pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    results: Vec<SectionResult>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: SectionResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[SectionResult] {
        &self.results
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|result| result.passed).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn all_passed(&self) -> bool {
        self.passed_count() == self.total()
    }

    pub fn exit_status(&self) -> u8 {
        if self.all_passed() {
            0
        } else {
            EXIT_FAILURE
        }
    }
}

impl FromIterator<SectionResult> for RunReport {
    fn from_iter<I: IntoIterator<Item = SectionResult>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(title: &str, passed: bool) -> SectionResult {
        SectionResult {
            title: title.to_string(),
            passed,
        }
    }

    #[test]
    fn every_section_must_pass() {
        let report: RunReport = [
            section("STEP 2 — Initial Server Setup", true),
            section("STEP 4 — Firewall (UFW)", false),
            section("STEP 8 — Docker", true),
        ]
        .into_iter()
        .collect();

        assert_eq!(report.passed_count(), 2);
        assert_eq!(report.total(), 3);
        assert!(!report.all_passed());
        assert_eq!(report.exit_status(), EXIT_FAILURE);
    }

    #[test]
    fn clean_run_exits_zero() {
        let mut report = RunReport::new();
        report.record(section("Backup", true));
        assert!(report.all_passed());
        assert_eq!(report.exit_status(), 0);
    }
}

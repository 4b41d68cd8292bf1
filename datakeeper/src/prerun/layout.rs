//! Classification of what is on disk before the first start of a boot.

/// What the data layout implies for the PreRun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutCase {
    /// No data: first clean start, or data removed by hand.
    NoData,
    /// Data without a version file: written by a release that did not
    /// track versions yet.
    LegacyData,
    /// Data with a version file: regular boot-history driven flow.
    Versioned,
}

/// Existence of the paths that matter:
///
/// | case | data | version | health | meaning                                         |
/// | ---- | ---- | ------- | ------ | ----------------------------------------------- |
/// | 1    | 0    | 0       | 0      | first, clean start                              |
/// | 2    | 0    | 0       | 1      | data removed manually, health/backups kept      |
/// | 3    | 0    | 1       | 0      | not detectable (version lives inside the data)  |
/// | 4    | 0    | 1       | 1      | not detectable (version lives inside the data)  |
/// | 5    | 1    | 0       | 0      | upgrade from a legacy release                   |
/// | 6    | 1    | 0       | 1      | legacy upgrade failed early                     |
/// | 7    | 1    | 1       | 0      | first start interrupted before health was known |
/// | 8    | 1    | 1       | 1      | regular                                         |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    pub data_exists: bool,
    pub version_exists: bool,
    pub health_exists: bool,
}

impl DataLayout {
    pub fn case_number(&self) -> u8 {
        1 + (self.data_exists as u8) * 4 + (self.version_exists as u8) * 2 + self.health_exists as u8
    }

    pub fn classify(&self) -> LayoutCase {
        match (self.data_exists, self.version_exists) {
            (false, _) => LayoutCase::NoData,
            (true, false) => LayoutCase::LegacyData,
            (true, true) => LayoutCase::Versioned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_combinations() {
        let expected = [
            (1, LayoutCase::NoData),
            (2, LayoutCase::NoData),
            (3, LayoutCase::NoData),
            (4, LayoutCase::NoData),
            (5, LayoutCase::LegacyData),
            (6, LayoutCase::LegacyData),
            (7, LayoutCase::Versioned),
            (8, LayoutCase::Versioned),
        ];

        for bits in 0u8..8 {
            let layout = DataLayout {
                data_exists: bits & 4 != 0,
                version_exists: bits & 2 != 0,
                health_exists: bits & 1 != 0,
            };
            let (case, class) = expected[bits as usize];
            assert_eq!(layout.case_number(), case);
            assert_eq!(layout.classify(), class, "case {case}");
        }
    }
}

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// Largest NR_CPUS the kernel can be configured with
pub const MAX_CPUS: u32 = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuSetError {
    #[error("empty element in cpu list {list:?}")]
    EmptyElement { list: String },

    #[error("invalid cpu id {value:?} in cpu list {list:?}")]
    InvalidCpu { list: String, value: String },

    #[error("invalid range {start}-{end} in cpu list {list:?}: start is greater than end")]
    ReversedRange { list: String, start: u32, end: u32 },

    #[error("range {start}-{end} in cpu list {list:?} spans more than {max} cpus", max = MAX_CPUS)]
    RangeTooLarge { list: String, start: u32, end: u32 },
}

/// An ordered set of unique CPU core ids, as written in the kernel cpulist
/// format ("0-3,7,10-11").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuSet {
    cpus: BTreeSet<u32>,
}

impl CpuSet {
    pub fn new() -> CpuSet {
        CpuSet::default()
    }

    pub fn parse(list: &str) -> Result<CpuSet, CpuSetError> {
        let mut cpus = BTreeSet::new();
        let trimmed = list.trim();
        if trimmed.is_empty() {
            return Ok(CpuSet { cpus });
        }

        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(CpuSetError::EmptyElement {
                    list: list.to_string(),
                });
            }

            // Only the first '-' separates the bounds, so "-1" and "1-2-3"
            // fail on their bounds rather than being read as ranges.
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_cpu_id(list, start)?;
                    let end = parse_cpu_id(list, end)?;
                    if start > end {
                        return Err(CpuSetError::ReversedRange {
                            list: list.to_string(),
                            start,
                            end,
                        });
                    }
                    if end - start >= MAX_CPUS {
                        return Err(CpuSetError::RangeTooLarge {
                            list: list.to_string(),
                            start,
                            end,
                        });
                    }
                    cpus.extend(start..=end);
                }
                None => {
                    cpus.insert(parse_cpu_id(list, part)?);
                }
            }
        }

        Ok(CpuSet { cpus })
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn contains(&self, cpu: u32) -> bool {
        self.cpus.contains(&cpu)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.cpus.iter().copied()
    }
}

fn parse_cpu_id(list: &str, value: &str) -> Result<u32, CpuSetError> {
    let value = value.trim();
    let invalid = || CpuSetError::InvalidCpu {
        list: list.to_string(),
        value: value.to_string(),
    };
    // str::parse accepts a leading '+', the cpulist format does not
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse::<u32>().map_err(|_| invalid())
}

impl FromStr for CpuSet {
    type Err = CpuSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CpuSet::parse(s)
    }
}

impl FromIterator<u32> for CpuSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        CpuSet {
            cpus: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CpuSet {
    type Item = u32;
    type IntoIter = std::collections::btree_set::IntoIter<u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.cpus.into_iter()
    }
}

// Canonical cpulist form: contiguous runs collapse into ranges.
impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cpus = self.cpus.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = cpus.next() {
            let mut end = start;
            while end.checked_add(1).is_some_and(|next| cpus.peek() == Some(&next)) {
                end += 1;
                cpus.next();
            }

            if !first {
                f.write_str(",")?;
            }
            first = false;

            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(set: &CpuSet) -> Vec<u32> {
        set.iter().collect()
    }

    #[test]
    fn parses_singles_and_ranges_collapsing_duplicates() {
        let set = CpuSet::parse("0,2-4,2").unwrap();
        assert_eq!(ids(&set), vec![0, 2, 3, 4]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn empty_input_is_an_empty_set() {
        assert!(CpuSet::parse("").unwrap().is_empty());
        assert!(CpuSet::parse("  \n").unwrap().is_empty());
    }

    #[test]
    fn tolerates_whitespace_and_trailing_newline() {
        let set = CpuSet::parse(" 0 - 1 , 8\n").unwrap();
        assert_eq!(ids(&set), vec![0, 1, 8]);
    }

    #[test]
    fn single_element_range() {
        assert_eq!(ids(&CpuSet::parse("5-5").unwrap()), vec![5]);
    }

    #[test]
    fn rejects_reversed_range() {
        assert_eq!(
            CpuSet::parse("3-1"),
            Err(CpuSetError::ReversedRange {
                list: "3-1".to_string(),
                start: 3,
                end: 1,
            })
        );
    }

    #[test]
    fn rejects_non_numeric_tokens() {
        assert!(matches!(
            CpuSet::parse("a,b"),
            Err(CpuSetError::InvalidCpu { value, .. }) if value == "a"
        ));
        assert!(CpuSet::parse("x-y").is_err());
        assert!(CpuSet::parse("+1").is_err());
        assert!(CpuSet::parse("1-2-3").is_err());
    }

    #[test]
    fn rejects_negative_numbers() {
        assert!(CpuSet::parse("-1").is_err());
        assert!(CpuSet::parse("0,-1").is_err());
    }

    #[test]
    fn rejects_empty_elements() {
        assert!(matches!(
            CpuSet::parse("0,,1"),
            Err(CpuSetError::EmptyElement { .. })
        ));
        assert!(CpuSet::parse("0,").is_err());
    }

    #[test]
    fn rejects_ids_beyond_u32() {
        assert!(CpuSet::parse("4294967296").is_err());
    }

    #[test]
    fn rejects_ranges_wider_than_max_cpus() {
        assert_eq!(
            CpuSet::parse("0-4294967295"),
            Err(CpuSetError::RangeTooLarge {
                list: "0-4294967295".to_string(),
                start: 0,
                end: u32::MAX,
            })
        );
        assert!(matches!(
            CpuSet::parse("1,100-8292"),
            Err(CpuSetError::RangeTooLarge { start: 100, end: 8292, .. })
        ));
        assert_eq!(CpuSet::parse("100-8291").unwrap().len(), MAX_CPUS as usize);
        assert_eq!(CpuSet::parse("4294967295").unwrap().len(), 1);
    }

    #[test]
    fn display_uses_canonical_ranges() {
        let set: CpuSet = [7, 0, 1, 2, 5, 9, 10].into_iter().collect();
        assert_eq!(set.to_string(), "0-2,5,7,9-10");
        assert_eq!(CpuSet::new().to_string(), "");
        assert_eq!(set.to_string().parse::<CpuSet>().unwrap(), set);
    }
}

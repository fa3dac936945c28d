use super::ExampleRecord;
use crate::common::*;

/// Keeps at most `examples_per_class` records per label.
///
/// The choice is determined by `seed`. Kept records retain their input order.
pub fn subsample_per_class(
    records: Vec<ExampleRecord>,
    examples_per_class: usize,
    seed: u64,
) -> Vec<ExampleRecord> {
    let mut rng = StdRng::seed_from_u64(seed);

    let groups: IndexMap<usize, Vec<usize>> = {
        let mut groups: IndexMap<usize, Vec<usize>> = IndexMap::new();
        records.iter().enumerate().for_each(|(index, record)| {
            groups.entry(record.label).or_default().push(index);
        });
        groups.sort_keys();
        groups
    };

    let kept: HashSet<usize> = groups
        .into_iter()
        .flat_map(|(_label, mut indexes)| {
            indexes.shuffle(&mut rng);
            indexes.truncate(examples_per_class);
            indexes
        })
        .collect();

    records
        .into_iter()
        .enumerate()
        .filter(|(index, _)| kept.contains(index))
        .map(|(_, record)| record)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(labels: &[usize]) -> Vec<ExampleRecord> {
        labels
            .iter()
            .enumerate()
            .map(|(id, &label)| ExampleRecord {
                id: id as u64,
                path: PathBuf::from(format!("{}.jpg", id)),
                category: format!("class{}", label),
                label,
            })
            .collect()
    }

    #[test]
    fn keep_examples_per_class() {
        let input = records(&[0, 0, 0, 0, 1, 1, 1, 2]);
        let output = subsample_per_class(input, 2, 0);

        let counts = output.iter().map(|record| record.label).counts();
        assert_eq!(counts[&0], 2);
        assert_eq!(counts[&1], 2);
        assert_eq!(counts[&2], 1);
        assert!(output
            .iter()
            .tuple_windows()
            .all(|(lhs, rhs)| lhs.id < rhs.id));
    }

    #[test]
    fn deterministic_by_seed() {
        let input = records(&[0; 50]);
        let lhs = subsample_per_class(input.clone(), 5, 42);
        let rhs = subsample_per_class(input, 5, 42);
        assert_eq!(lhs, rhs);
    }
}

use std::collections::HashSet;

/// Degree centrality of the term co-occurrence graph built from `rows`
/// (documents × terms). Two terms are linked when some document has both.
/// Returns `(term index, centrality)` sorted by centrality, then index.
pub fn degree_centrality(rows: &[Vec<f64>]) -> Vec<(usize, f64)> {
    let n = rows.first().map(Vec::len).unwrap_or(0);
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![(0, 1.0)];
    }

    let mut neighbors: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for row in rows {
        let present: Vec<usize> = row
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .map(|(i, _)| i)
            .collect();
        for (a_pos, &a) in present.iter().enumerate() {
            for &b in &present[a_pos + 1..] {
                neighbors[a].insert(b);
                neighbors[b].insert(a);
            }
        }
    }

    let scale = 1.0 / (n - 1) as f64;
    let mut scores: Vec<(usize, f64)> = neighbors
        .iter()
        .enumerate()
        .map(|(i, set)| (i, set.len() as f64 * scale))
        .collect();
    scores.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scores
}

#[cfg(test)]
mod tests {
    use super::degree_centrality;

    #[test]
    fn hub_term_ranks_first() {
        // term 0 co-occurs with 1, 2 and 3; 1..3 only with 0
        let rows = vec![
            vec![0.5, 0.5, 0.0, 0.0],
            vec![0.5, 0.0, 0.5, 0.0],
            vec![0.5, 0.0, 0.0, 0.5],
        ];
        let scores = degree_centrality(&rows);
        assert_eq!(scores[0], (0, 1.0));
        let third = 1.0 / 3.0;
        assert_eq!(scores[1..].iter().map(|s| s.0).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(scores[1..].iter().all(|s| (s.1 - third).abs() < 1e-12));
    }

    #[test]
    fn isolated_terms_score_zero() {
        let rows = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        let scores = degree_centrality(&rows);
        assert!(scores.iter().all(|(_, s)| *s == 0.0));
        assert!(degree_centrality(&[]).is_empty());
    }
}

//! Unions of sets and relations over different tuples.
//!
//! Elements are keyed by their tuple (name and arity); all elements share
//! one parameter list.

use crate::polyhedral::map::IntegerMap;
use crate::polyhedral::set::{fmt_body, IntegerSet};
use crate::polyhedral::space::Space;
use std::fmt;

/// A union of sets living in different tuple spaces.
#[derive(Debug, Clone, Default)]
pub struct UnionSet {
    params: Vec<String>,
    sets: Vec<IntegerSet>,
}

/// A union of relations between different tuple spaces.
#[derive(Debug, Clone, Default)]
pub struct UnionMap {
    params: Vec<String>,
    maps: Vec<IntegerMap>,
}

impl UnionSet {
    /// The empty union.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A union holding one set.
    pub fn from_set(set: IntegerSet) -> Self {
        let mut u = Self::empty();
        u.add(set);
        u
    }

    /// Parameter names shared by all elements.
    pub fn params_names(&self) -> &[String] {
        &self.params
    }

    fn realign(&mut self, params: &[String]) {
        if self.params == params {
            return;
        }
        self.params = params.to_vec();
        for s in self.sets.iter_mut() {
            *s = s.align_params(params);
        }
    }

    /// Add a set, merging it with the element of the same tuple.
    pub fn add(&mut self, set: IntegerSet) {
        let params = merge_params(&self.params, &set.space.param_names);
        self.realign(&params);
        let set = set.align_params(&params);
        match self.sets.iter_mut().find(|s| s.space.has_equal_tuples(&set.space)) {
            Some(existing) => *existing = existing.union(&set),
            None => self.sets.push(set),
        }
    }

    /// Builder-style [`UnionSet::add`].
    pub fn with(mut self, set: IntegerSet) -> Self {
        self.add(set);
        self
    }

    /// The elements.
    pub fn sets(&self) -> &[IntegerSet] {
        &self.sets
    }

    /// The element with the given tuple name.
    pub fn get(&self, name: &str) -> Option<&IntegerSet> {
        self.sets.iter().find(|s| s.tuple_name() == Some(name))
    }

    /// The element with the same tuple as `space`.
    pub fn extract(&self, space: &Space) -> IntegerSet {
        self.sets
            .iter()
            .find(|s| s.space.has_equal_tuples(space))
            .cloned()
            .unwrap_or_else(|| IntegerSet::empty(space.clone().with_param_names(self.params.clone())))
    }

    /// Whether every element is empty.
    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(|s| s.is_empty())
    }

    /// Union.
    pub fn union(&self, other: &UnionSet) -> UnionSet {
        let mut result = self.clone();
        for s in &other.sets {
            result.add(s.clone());
        }
        result
    }

    /// Intersection, element by element.
    pub fn intersect(&self, other: &UnionSet) -> UnionSet {
        let mut result = UnionSet::empty();
        for a in &self.sets {
            for b in &other.sets {
                if a.space.has_equal_tuples(&b.space) {
                    let i = a.intersect(b);
                    if !i.is_empty() {
                        result.add(i);
                    }
                }
            }
        }
        result.realign(&merge_params(&result.params, &merge_params(&self.params, &other.params)));
        result
    }

    /// Difference, element by element.
    pub fn subtract(&self, other: &UnionSet) -> UnionSet {
        let mut result = UnionSet::empty();
        for a in &self.sets {
            let diff = match other.sets.iter().find(|b| a.space.has_equal_tuples(&b.space)) {
                Some(b) => a.subtract(b),
                None => a.clone(),
            };
            if !diff.is_empty() {
                result.add(diff);
            }
        }
        result
    }

    /// Whether `self` is contained in `other`.
    pub fn is_subset(&self, other: &UnionSet) -> bool {
        self.sets.iter().all(|a| {
            a.is_empty()
                || other
                    .sets
                    .iter()
                    .find(|b| a.space.has_equal_tuples(&b.space))
                    .map_or(false, |b| a.is_subset(b))
        })
    }

    /// Whether both unions contain the same points.
    pub fn is_equal(&self, other: &UnionSet) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }

    /// Coalesce every element and drop empty ones.
    pub fn coalesce(&self) -> UnionSet {
        let mut result = UnionSet { params: self.params.clone(), sets: Vec::new() };
        for s in &self.sets {
            let c = s.coalesce();
            if !c.pieces.is_empty() {
                result.sets.push(c);
            }
        }
        result
    }

    /// Parameter values for which some element is non-empty.
    pub fn params(&self) -> IntegerSet {
        let mut result = IntegerSet::empty(Space::params(self.params.clone()));
        for s in &self.sets {
            result = result.union(&s.params());
        }
        result
    }

    /// Intersect every element with a parameter set.
    pub fn intersect_params(&self, params: &IntegerSet) -> UnionSet {
        let mut result = UnionSet::empty();
        for s in &self.sets {
            result.add(s.intersect_params(params));
        }
        result
    }

    /// Simplify every element assuming the parameter set `context`.
    pub fn gist_params(&self, context: &IntegerSet) -> UnionSet {
        let mut result = UnionSet::empty();
        for s in &self.sets {
            result.add(s.gist_params(context));
        }
        result
    }

    /// The image under a union relation.
    pub fn apply(&self, map: &UnionMap) -> UnionSet {
        map.intersect_domain(self).range()
    }

    /// The identity relation on every element.
    pub fn identity(&self) -> UnionMap {
        let mut result = UnionMap::empty();
        for s in &self.sets {
            result.add(IntegerMap::identity(&s.space).intersect_domain(s));
        }
        result
    }
}

impl UnionMap {
    /// The empty union.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A union holding one relation.
    pub fn from_map(map: IntegerMap) -> Self {
        let mut u = Self::empty();
        u.add(map);
        u
    }

    /// Parameter names shared by all elements.
    pub fn params_names(&self) -> &[String] {
        &self.params
    }

    fn realign(&mut self, params: &[String]) {
        if self.params == params {
            return;
        }
        self.params = params.to_vec();
        for m in self.maps.iter_mut() {
            *m = m.align_params(params);
        }
    }

    /// Add a relation, merging it with the element of the same tuples.
    pub fn add(&mut self, map: IntegerMap) {
        let params = merge_params(&self.params, &map.space().param_names);
        self.realign(&params);
        let map = map.align_params(&params);
        match self.maps.iter_mut().find(|m| m.space().has_equal_tuples(map.space())) {
            Some(existing) => *existing = existing.union(&map),
            None => self.maps.push(map),
        }
    }

    /// Builder-style [`UnionMap::add`].
    pub fn with(mut self, map: IntegerMap) -> Self {
        self.add(map);
        self
    }

    /// The elements.
    pub fn maps(&self) -> &[IntegerMap] {
        &self.maps
    }

    /// The relation between two named tuples, if present.
    pub fn get(&self, in_name: &str, out_name: &str) -> Option<&IntegerMap> {
        self.maps
            .iter()
            .find(|m| m.in_name() == Some(in_name) && m.out_name() == Some(out_name))
    }

    /// Whether every element is empty.
    pub fn is_empty(&self) -> bool {
        self.maps.iter().all(|m| m.is_empty())
    }

    /// Union.
    pub fn union(&self, other: &UnionMap) -> UnionMap {
        let mut result = self.clone();
        for m in &other.maps {
            result.add(m.clone());
        }
        result
    }

    /// Intersection, element by element.
    pub fn intersect(&self, other: &UnionMap) -> UnionMap {
        let mut result = UnionMap::empty();
        for a in &self.maps {
            for b in &other.maps {
                if a.space().has_equal_tuples(b.space()) {
                    let i = a.intersect(b);
                    if !i.is_empty() {
                        result.add(i);
                    }
                }
            }
        }
        result
    }

    /// Difference, element by element.
    pub fn subtract(&self, other: &UnionMap) -> UnionMap {
        let mut result = UnionMap::empty();
        for a in &self.maps {
            let diff = match other.maps.iter().find(|b| a.space().has_equal_tuples(b.space())) {
                Some(b) => a.subtract(b),
                None => a.clone(),
            };
            if !diff.is_empty() {
                result.add(diff);
            }
        }
        result
    }

    /// Whether `self` is contained in `other`.
    pub fn is_subset(&self, other: &UnionMap) -> bool {
        self.maps.iter().all(|a| {
            a.is_empty()
                || other
                    .maps
                    .iter()
                    .find(|b| a.space().has_equal_tuples(b.space()))
                    .map_or(false, |b| a.is_subset(b))
        })
    }

    /// Whether both unions contain the same pairs.
    pub fn is_equal(&self, other: &UnionMap) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }

    /// Coalesce every element and drop empty ones.
    pub fn coalesce(&self) -> UnionMap {
        let mut result = UnionMap { params: self.params.clone(), maps: Vec::new() };
        for m in &self.maps {
            let c = m.coalesce();
            if !c.pieces().is_empty() {
                result.maps.push(c);
            }
        }
        result
    }

    /// Swap inputs and outputs.
    pub fn reverse(&self) -> UnionMap {
        let mut result = UnionMap::empty();
        for m in &self.maps {
            result.add(m.reverse());
        }
        result
    }

    /// Union of the domains.
    pub fn domain(&self) -> UnionSet {
        let mut result = UnionSet::empty();
        for m in &self.maps {
            result.add(m.domain());
        }
        result
    }

    /// Union of the ranges.
    pub fn range(&self) -> UnionSet {
        let mut result = UnionSet::empty();
        for m in &self.maps {
            result.add(m.range());
        }
        result
    }

    /// Parameter values for which some element is non-empty.
    pub fn params(&self) -> IntegerSet {
        let mut result = IntegerSet::empty(Space::params(self.params.clone()));
        for m in &self.maps {
            result = result.union(&m.params());
        }
        result
    }

    /// Restrict inputs to a union set.
    pub fn intersect_domain(&self, set: &UnionSet) -> UnionMap {
        let mut result = UnionMap::empty();
        for m in &self.maps {
            let dom_space = m.space().domain();
            for s in set.sets() {
                if s.space.has_equal_tuples(&dom_space) {
                    result.add(m.intersect_domain(s));
                }
            }
        }
        result
    }

    /// Restrict outputs to a union set.
    pub fn intersect_range(&self, set: &UnionSet) -> UnionMap {
        let mut result = UnionMap::empty();
        for m in &self.maps {
            let ran_space = m.space().range();
            for s in set.sets() {
                if s.space.has_equal_tuples(&ran_space) {
                    result.add(m.intersect_range(s));
                }
            }
        }
        result
    }

    /// Remove pairs whose input lies in `set`.
    pub fn subtract_domain(&self, set: &UnionSet) -> UnionMap {
        let mut result = UnionMap::empty();
        for m in &self.maps {
            let dom_space = m.space().domain();
            match set.sets().iter().find(|s| s.space.has_equal_tuples(&dom_space)) {
                Some(s) => result.add(m.subtract_domain(s)),
                None => result.add(m.clone()),
            }
        }
        result
    }

    /// Intersect every element with a parameter set.
    pub fn intersect_params(&self, params: &IntegerSet) -> UnionMap {
        let mut result = UnionMap::empty();
        for m in &self.maps {
            result.add(m.intersect_params(params));
        }
        result
    }

    /// Composition joined on tuple names: `self` followed by `other`.
    pub fn apply_range(&self, other: &UnionMap) -> UnionMap {
        let mut result = UnionMap::empty();
        for a in &self.maps {
            let mid = a.space().range();
            for b in &other.maps {
                if b.space().domain().has_equal_tuples(&mid) {
                    let c = a.apply_range(b);
                    if !c.is_empty() {
                        result.add(c);
                    }
                }
            }
        }
        result
    }

    /// Apply `other` to the inputs of `self`.
    pub fn apply_domain(&self, other: &UnionMap) -> UnionMap {
        self.reverse().apply_range(other).reverse()
    }

    /// Differences `out - in` of all elements with equal arities, merged
    /// into anonymous sets.
    pub fn deltas(&self) -> UnionSet {
        let mut result = UnionSet::empty();
        for m in &self.maps {
            if m.n_in() == m.n_out() {
                result.add(m.deltas());
            }
        }
        result
    }

    /// Whether every element is single-valued and no two elements share an input tuple.
    pub fn is_single_valued(&self) -> bool {
        self.maps.iter().all(|m| m.is_single_valued())
            && self.maps.iter().enumerate().all(|(i, a)| {
                self.maps.iter().skip(i + 1).all(|b| {
                    !a.space().domain().has_equal_tuples(&b.space().domain())
                        || a.domain().intersect(&b.domain()).is_empty()
                })
            })
    }

    /// Simplify every element assuming the inputs lie in `domain`.
    pub fn gist_domain(&self, domain: &UnionSet) -> UnionMap {
        let mut result = UnionMap::empty();
        for m in &self.maps {
            let dom = domain.extract(&m.space().domain());
            result.add(m.gist_domain(&dom));
        }
        result
    }
}

fn merge_params(a: &[String], b: &[String]) -> Vec<String> {
    let mut names = a.to_vec();
    for name in b {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

impl fmt::Display for UnionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.params.is_empty() {
            write!(f, "[{}] -> ", self.params.join(", "))?;
        }
        let parts: Vec<String> = self.sets.iter().flat_map(|s| fmt_body(&s.space, &s.pieces)).collect();
        if parts.is_empty() {
            write!(f, "{{  }}")
        } else {
            write!(f, "{{ {} }}", parts.join("; "))
        }
    }
}

impl fmt::Display for UnionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.params.is_empty() {
            write!(f, "[{}] -> ", self.params.join(", "))?;
        }
        let parts: Vec<String> = self
            .maps
            .iter()
            .flat_map(|m| fmt_body(m.space(), m.pieces()))
            .collect();
        if parts.is_empty() {
            write!(f, "{{  }}")
        } else {
            write!(f, "{{ {} }}", parts.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::expr::AffineExpr;

    fn named_interval(name: &str, lo: i64, hi: i64) -> IntegerSet {
        IntegerSet::rectangular(&[(lo, hi)]).set_tuple_name(Some(name.to_string()))
    }

    #[test]
    fn test_union_set_merges_same_tuple() {
        let u = UnionSet::empty()
            .with(named_interval("S", 0, 3))
            .with(named_interval("S", 4, 7))
            .with(named_interval("T", 0, 1));
        assert_eq!(u.sets().len(), 2);
        assert!(u.get("S").map_or(false, |s| s.contains(&[5])));
    }

    #[test]
    fn test_apply_range_joins_on_names() {
        let s_to_a = IntegerMap::from_affine(Space::named_map("S", 1, "A", 1), &[AffineExpr::from_coeffs(vec![1, 0], 0)]);
        let a_to_t = IntegerMap::from_affine(Space::named_map("A", 1, "T", 1), &[AffineExpr::from_coeffs(vec![1, 0], 1)]);
        let b_to_t = IntegerMap::from_affine(Space::named_map("B", 1, "T", 1), &[AffineExpr::from_coeffs(vec![1, 0], 5)]);
        let left = UnionMap::from_map(s_to_a);
        let right = UnionMap::empty().with(a_to_t).with(b_to_t);
        let composed = left.apply_range(&right);
        assert_eq!(composed.maps().len(), 1);
        let m = composed.get("S", "T").map(|m| m.contains(&[2, 3]));
        assert_eq!(m, Some(true));
    }

    #[test]
    fn test_intersect_domain_and_subtract() {
        let m = IntegerMap::from_affine(Space::named_map("S", 1, "A", 1), &[AffineExpr::from_coeffs(vec![1, 0], 0)]);
        let u = UnionMap::from_map(m).intersect_domain(&UnionSet::from_set(named_interval("S", 0, 9)));
        let removed = u.subtract_domain(&UnionSet::from_set(named_interval("S", 0, 4)));
        assert!(removed.domain().is_equal(&UnionSet::from_set(named_interval("S", 5, 9))));
    }
}

//! Translation of symbolic scalar expressions into piecewise quasi-affine
//! functions over a statement's iteration space.
//!
//! The iteration space of a location has one dimension per surrounding
//! (non-boxed) loop, outermost first, and the parameters of the Scop.
//! Values that are invariant in the region become parameters.

use crate::ir::host::{BlockId, CmpPred, HostFunction, InstKind};
use crate::ir::pir::{AssumptionKind, AssumptionSign, Scop};
use crate::ir::scev::{SymExpr, ValueRef};
use crate::polyhedral::{CmpOp, IntegerSet, PwAff, Space};
use log::{debug, trace};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Default ceiling on the number of pieces of an intermediate result.
pub const DEFAULT_MAX_PIECES: usize = 100;

/// Why an expression could not be translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonAffineReason {
    /// Truncation, zero extension, unsigned division and similar
    Unsupported(String),
    /// Product of two non-constant terms, or a division by a non-constant
    NonLinear,
    /// Too many pieces in an intermediate result
    TooComplex,
    /// A value that changes inside the region
    VariantValue(ValueRef),
    /// An add-recurrence of a loop that does not surround the location
    ForeignLoop(BlockId),
}

impl fmt::Display for NonAffineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonAffineReason::Unsupported(what) => write!(f, "unsupported expression: {}", what),
            NonAffineReason::NonLinear => write!(f, "non-linear expression"),
            NonAffineReason::TooComplex => write!(f, "expression too complex"),
            NonAffineReason::VariantValue(v) => write!(f, "{} varies inside the region", v),
            NonAffineReason::ForeignLoop(h) => write!(f, "recurrence of loop {} used outside of it", h),
        }
    }
}

/// Result of a translation. Failing to translate is not an error: callers
/// degrade to an over-approximation.
#[derive(Debug, Clone)]
pub enum AffineResult {
    Affine(PwAff),
    NonAffine(NonAffineReason),
}

impl AffineResult {
    pub fn is_affine(&self) -> bool {
        matches!(self, AffineResult::Affine(_))
    }

    pub fn affine(self) -> Option<PwAff> {
        match self {
            AffineResult::Affine(pw) => Some(pw),
            AffineResult::NonAffine(_) => None,
        }
    }
}

/// Where an expression is evaluated: the surrounding loops and, for
/// recording assumptions, the block and its domain. Locations without a
/// domain never record assumptions.
#[derive(Debug, Clone, Copy)]
pub struct Location<'a> {
    pub loops: &'a [BlockId],
    pub block: Option<BlockId>,
    pub domain: Option<&'a IntegerSet>,
}

impl<'a> Location<'a> {
    pub fn new(loops: &'a [BlockId]) -> Self {
        Self { loops, block: None, domain: None }
    }

    pub fn at(mut self, block: BlockId, domain: &'a IntegerSet) -> Self {
        self.block = Some(block);
        self.domain = Some(domain);
        self
    }
}

type CacheKey = (SymExpr, Vec<BlockId>, Option<BlockId>);

/// Memoizing expression translator.
pub struct Affinator<'f> {
    func: &'f HostFunction,
    region_blocks: BTreeSet<BlockId>,
    /// Loads hoisted into a parameter, by the value they define
    param_alias: HashMap<ValueRef, String>,
    ignore_wrapping: bool,
    max_pieces: usize,
    cache: HashMap<CacheKey, Option<PwAff>>,
}

/// Per-translation scratch state.
struct Walk<'s> {
    scop: &'s mut Scop,
    loops: &'s [BlockId],
    wrapping: Vec<IntegerSet>,
}

impl<'f> Affinator<'f> {
    pub fn new(func: &'f HostFunction, region_blocks: BTreeSet<BlockId>) -> Self {
        Self {
            func,
            region_blocks,
            param_alias: HashMap::new(),
            ignore_wrapping: false,
            max_pieces: DEFAULT_MAX_PIECES,
            cache: HashMap::new(),
        }
    }

    pub fn with_ignore_wrapping(mut self, ignore: bool) -> Self {
        self.ignore_wrapping = ignore;
        self
    }

    pub fn with_max_pieces(mut self, max_pieces: usize) -> Self {
        self.max_pieces = max_pieces;
        self
    }

    /// Make `value` stand for the parameter `param`. Drops cached results.
    pub fn alias_parameter(&mut self, value: ValueRef, param: &str) {
        self.param_alias.insert(value, param.to_string());
        self.cache.clear();
    }

    /// Forget all memoized results.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// The iteration space of a location.
    pub fn space(scop: &Scop, loops: &[BlockId]) -> Space {
        Space::set(loops.len()).with_param_names(scop.param_names())
    }

    /// Translate `expr` evaluated at `loc`.
    ///
    /// Unless the expression cannot wrap, a `WRAPPING` restriction excluding
    /// the parameter values under which fixed-width evaluation differs from
    /// the mathematical value is recorded on first translation.
    pub fn translate(&mut self, scop: &mut Scop, expr: &SymExpr, loc: Location<'_>) -> AffineResult {
        let key: CacheKey = (expr.clone(), loc.loops.to_vec(), loc.block);
        if let Some(cached) = self.cache.get(&key) {
            return match cached {
                Some(pw) => AffineResult::Affine(pw.align_params(&scop.param_names())),
                None => AffineResult::NonAffine(NonAffineReason::TooComplex),
            };
        }
        let mut walk = Walk { scop, loops: loc.loops, wrapping: Vec::new() };
        let result = self.visit(&mut walk, expr);
        let wrapping = std::mem::take(&mut walk.wrapping);
        match result {
            Ok(pw) => {
                if !self.ignore_wrapping && loc.domain.is_some() {
                    Self::record_wrapping(scop, wrapping, &loc);
                }
                let pw = pw.align_params(&scop.param_names());
                self.cache.insert(key, Some(pw.clone()));
                AffineResult::Affine(pw)
            }
            Err(reason) => {
                trace!("{} is not affine: {}", expr, reason);
                if reason == NonAffineReason::TooComplex {
                    self.cache.insert(key, None);
                }
                AffineResult::NonAffine(reason)
            }
        }
    }

    /// Whether `expr` is affine at `loc`, without recording assumptions.
    pub fn is_affine(&mut self, scop: &mut Scop, expr: &SymExpr, loops: &[BlockId]) -> bool {
        let mut walk = Walk { scop, loops, wrapping: Vec::new() };
        self.visit(&mut walk, expr).is_ok()
    }

    /// The set of instances at `loc` where `lhs pred rhs` holds. Unsigned
    /// predicates are treated as signed under an `UNSIGNED` assumption
    /// that both sides are non-negative.
    pub fn condition(
        &mut self,
        scop: &mut Scop,
        pred: CmpPred,
        lhs: &SymExpr,
        rhs: &SymExpr,
        loc: Location<'_>,
    ) -> Option<IntegerSet> {
        let l = self.translate(scop, lhs, loc).affine()?;
        let r = self.translate(scop, rhs, loc).affine()?;
        if let (true, Some(domain)) = (pred.is_unsigned(), loc.domain) {
            let zero = PwAff::constant(l.space.clone(), 0);
            let negative = l.lt_set(&zero).union(&r.lt_set(&zero)).intersect(domain);
            scop.add_assumption(AssumptionKind::Unsigned, negative.params(), AssumptionSign::Restriction, loc.block);
        }
        let op = match pred {
            CmpPred::Eq => CmpOp::Eq,
            CmpPred::Ne => CmpOp::Ne,
            CmpPred::Slt | CmpPred::Ult => CmpOp::Lt,
            CmpPred::Sle | CmpPred::Ule => CmpOp::Le,
            CmpPred::Sgt | CmpPred::Ugt => CmpOp::Gt,
            CmpPred::Sge | CmpPred::Uge => CmpOp::Ge,
        };
        Some(l.cmp_set(&r, op).align_params(&scop.param_names()))
    }

    fn record_wrapping(scop: &mut Scop, wrapping: Vec<IntegerSet>, loc: &Location<'_>) {
        for set in wrapping {
            let set = match loc.domain {
                Some(domain) => set.intersect(domain),
                None => continue,
            };
            let params = set.params().coalesce();
            if params.is_empty() {
                continue;
            }
            debug!("expression may wrap for {}", params);
            scop.add_assumption(AssumptionKind::Wrapping, params, AssumptionSign::Restriction, loc.block);
        }
    }

    fn check_pieces(&self, pw: PwAff) -> Result<PwAff, NonAffineReason> {
        if pw.n_piece() > self.max_pieces {
            Err(NonAffineReason::TooComplex)
        } else {
            Ok(pw)
        }
    }

    fn space_of(walk: &Walk<'_>) -> Space {
        Self::space(walk.scop, walk.loops)
    }

    fn visit(&self, walk: &mut Walk<'_>, expr: &SymExpr) -> Result<PwAff, NonAffineReason> {
        match expr {
            SymExpr::Constant { value, .. } => Ok(PwAff::constant(Self::space_of(walk), *value)),
            SymExpr::Unknown { value, bits } => self.visit_unknown(walk, value, *bits),
            SymExpr::Add { ops, nsw } => {
                let mut sum: Option<PwAff> = None;
                for op in ops {
                    let v = self.visit(walk, op)?;
                    sum = Some(match sum {
                        Some(s) => self.check_pieces(s.add(&v))?,
                        None => v,
                    });
                }
                let sum = sum.unwrap_or_else(|| PwAff::constant(Self::space_of(walk), 0));
                if !nsw {
                    walk.wrapping.push(sum.out_of_range_set(expr.bit_width()));
                }
                Ok(sum)
            }
            SymExpr::Mul { ops, nsw } => {
                let mut prod: Option<PwAff> = None;
                for op in ops {
                    let v = self.visit(walk, op)?;
                    prod = Some(match prod {
                        Some(p) => self.check_pieces(p.mul(&v).ok_or(NonAffineReason::NonLinear)?)?,
                        None => v,
                    });
                }
                let prod = prod.unwrap_or_else(|| PwAff::constant(Self::space_of(walk), 1));
                if !nsw {
                    walk.wrapping.push(prod.out_of_range_set(expr.bit_width()));
                }
                Ok(prod)
            }
            SymExpr::AddRec { start, step, loop_header, nsw } => {
                let Some(dim) = walk.loops.iter().position(|h| h == loop_header) else {
                    return Err(NonAffineReason::ForeignLoop(*loop_header));
                };
                let start = self.visit(walk, start)?;
                let step = self.visit(walk, step)?;
                let iv = PwAff::dim(Self::space_of(walk), dim);
                let scaled = step.mul(&iv).ok_or(NonAffineReason::NonLinear)?;
                let value = self.check_pieces(start.add(&scaled))?;
                if !nsw {
                    walk.wrapping.push(value.out_of_range_set(expr.bit_width()));
                }
                Ok(value)
            }
            // signed values are assumed not to need the extension
            SymExpr::SignExtend { op, .. } => self.visit(walk, op),
            SymExpr::ZeroExtend { .. } => Err(NonAffineReason::Unsupported("zext".to_string())),
            SymExpr::Truncate { .. } => Err(NonAffineReason::Unsupported("trunc".to_string())),
            SymExpr::UDiv { .. } => Err(NonAffineReason::Unsupported("udiv".to_string())),
            SymExpr::UMax(_) => Err(NonAffineReason::Unsupported("umax".to_string())),
            SymExpr::SMax(ops) | SymExpr::SMin(ops) => {
                let take_max = matches!(expr, SymExpr::SMax(_));
                let mut acc: Option<PwAff> = None;
                for op in ops {
                    let v = self.visit(walk, op)?;
                    acc = Some(match acc {
                        Some(a) => self.check_pieces(if take_max { a.max(&v) } else { a.min(&v) })?,
                        None => v,
                    });
                }
                acc.ok_or_else(|| NonAffineReason::Unsupported("empty min/max".to_string()))
            }
            SymExpr::SDiv { lhs, rhs } | SymExpr::SRem { lhs, rhs } => {
                let Some(divisor) = rhs.as_constant().filter(|d| *d != 0) else {
                    return Err(NonAffineReason::NonLinear);
                };
                let value = self.visit(walk, lhs)?;
                let result = match expr {
                    SymExpr::SDiv { .. } if divisor > 0 => value.tdiv_q(divisor),
                    SymExpr::SDiv { .. } => value.tdiv_q(-divisor).neg(),
                    _ => value.tdiv_r(divisor.abs()),
                };
                self.check_pieces(result)
            }
        }
    }

    fn visit_unknown(&self, walk: &mut Walk<'_>, value: &ValueRef, bits: u32) -> Result<PwAff, NonAffineReason> {
        if let Some(param) = self.param_alias.get(value) {
            let name = walk.scop.add_parameter(param, None, bits);
            return Ok(PwAff::param(Self::space_of(walk), &name));
        }
        let name = match value {
            ValueRef::Argument(name) => name.clone(),
            ValueRef::Inst(id) => {
                let inst = self.func.inst(*id);
                if self.region_blocks.contains(&inst.block) && !matches!(inst.kind, InstKind::Load { .. }) {
                    return Err(NonAffineReason::VariantValue(value.clone()));
                }
                inst.name.clone()
            }
        };
        let expr = SymExpr::Unknown { value: value.clone(), bits: 64 };
        let name = walk.scop.add_parameter(&name, Some(expr), bits);
        Ok(PwAff::param(Self::space_of(walk), &name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::host::{ArrayDecl, FunctionBuilder, Pointer};
    use crate::polyhedral::PolyCtx;

    fn one_loop(bits: u32) -> (HostFunction, BlockId) {
        let mut b = FunctionBuilder::new("f");
        let n = b.arg("N", bits);
        b.array(ArrayDecl::new("A", vec![None]));
        let entry = b.block("entry");
        let l = b.counted_loop("i", entry, SymExpr::constant(0), n);
        b.store(Pointer::new("A", vec![SymExpr::induction(l.header)]), crate::ir::host::Operand::Const(0));
        b.br(l.latch);
        b.switch_to(l.exit);
        b.ret();
        (b.build().unwrap(), l.header)
    }

    fn i32_iv(header: BlockId) -> SymExpr {
        SymExpr::addrec(SymExpr::constant(0).with_bits(32), SymExpr::constant(1).with_bits(32), header).with_nsw()
    }

    #[test]
    fn test_induction_and_parameters() {
        let (func, header) = one_loop(64);
        let mut scop = Scop::new("f", PolyCtx::unlimited());
        let mut aff = Affinator::new(&func, func.loop_by_header(header).unwrap().blocks.clone());
        let loops = [header];
        let expr = SymExpr::add(SymExpr::induction(header), SymExpr::mul(SymExpr::constant(2), SymExpr::arg("N")));
        let pw = aff.translate(&mut scop, &expr, Location::new(&loops)).affine().unwrap();
        assert_eq!(scop.param_names(), vec!["N".to_string()]);
        let e = pw.as_affine().unwrap();
        // [N | i]
        assert_eq!(e.coeff(0), 2);
        assert_eq!(e.coeff(1), 1);
        assert_eq!(aff.cache_len(), 1);
    }

    #[test]
    fn test_unsupported_forms() {
        let (func, header) = one_loop(64);
        let mut scop = Scop::new("f", PolyCtx::unlimited());
        let mut aff = Affinator::new(&func, BTreeSet::new());
        let loops = [header];
        let iv = SymExpr::induction(header);
        let cases = vec![
            SymExpr::zext(iv.clone(), 64),
            SymExpr::trunc(iv.clone(), 32),
            SymExpr::udiv(iv.clone(), SymExpr::constant(2)),
            SymExpr::mul(iv.clone(), SymExpr::arg("N")),
            SymExpr::sdiv(iv.clone(), SymExpr::arg("N")),
        ];
        for expr in cases {
            assert!(!aff.translate(&mut scop, &expr, Location::new(&loops)).is_affine(), "{}", expr);
        }
        let foreign = SymExpr::induction(BlockId(99));
        match aff.translate(&mut scop, &foreign, Location::new(&loops)) {
            AffineResult::NonAffine(NonAffineReason::ForeignLoop(h)) => assert_eq!(h, BlockId(99)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_constant_division_and_remainder() {
        let (func, header) = one_loop(64);
        let mut scop = Scop::new("f", PolyCtx::unlimited());
        let mut aff = Affinator::new(&func, BTreeSet::new());
        let loops = [header];
        let iv = SymExpr::induction(header);
        let q = aff.translate(&mut scop, &SymExpr::sdiv(iv.clone(), SymExpr::constant(4)), Location::new(&loops));
        let r = aff.translate(&mut scop, &SymExpr::srem(iv, SymExpr::constant(4)), Location::new(&loops));
        let q = q.affine().unwrap();
        let r = r.affine().unwrap();
        let one = PwAff::constant(q.space.clone(), 1);
        let three = PwAff::constant(r.space.clone(), 3);
        assert!(q.eq_set(&one).contains(&[7]));
        assert!(!q.eq_set(&one).contains(&[8]));
        assert!(r.eq_set(&three).contains(&[7]));
        assert!(r.eq_set(&three).contains(&[11]));
    }

    #[test]
    fn test_min_max() {
        let (func, header) = one_loop(64);
        let mut scop = Scop::new("f", PolyCtx::unlimited());
        let mut aff = Affinator::new(&func, BTreeSet::new());
        let loops = [header];
        let expr = SymExpr::SMax(vec![SymExpr::induction(header), SymExpr::arg("N")]);
        let pw = aff.translate(&mut scop, &expr, Location::new(&loops)).affine().unwrap();
        assert_eq!(pw.n_piece(), 2);
    }

    #[test]
    fn test_long_max_chain_is_too_complex() {
        let (func, header) = one_loop(64);
        let mut scop = Scop::new("f", PolyCtx::unlimited());
        let mut aff = Affinator::new(&func, BTreeSet::new());
        let loops = [header];
        let expr = SymExpr::SMax((0..150).map(|k| SymExpr::arg(&format!("P{}", k))).collect());
        match aff.translate(&mut scop, &expr, Location::new(&loops)) {
            AffineResult::NonAffine(reason) => {
                assert_eq!(reason, NonAffineReason::TooComplex);
                assert_eq!(reason.to_string(), "expression too complex");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(aff.cache_len(), 1);
        assert!(!aff.translate(&mut scop, &expr, Location::new(&loops)).is_affine());
    }

    #[test]
    fn test_wrapping_assumption_for_64_bit_values() {
        let (func, header) = one_loop(64);
        let loops = [header];
        let domain = crate::polyhedral::parse_set("[N] -> { [i] : 0 <= i < N }").unwrap();
        let mut scop = Scop::new("f", PolyCtx::unlimited());
        scop.add_parameter("N", Some(SymExpr::arg("N")), 64);
        let mut aff = Affinator::new(&func, BTreeSet::new());
        let scaled = SymExpr::mul(SymExpr::constant(4), SymExpr::induction(header));
        assert!(aff.translate(&mut scop, &scaled, Location::new(&loops).at(header, &domain)).is_affine());
        assert!(scop.assumptions.iter().any(|a| a.kind == AssumptionKind::Wrapping));
        // 4 * i leaves the i64 range once i reaches 2^61
        assert!(scop.invalid_context.contains(&[(1i64 << 61) + 1]));
        assert!(!scop.invalid_context.contains(&[1i64 << 61]));
        assert!(!scop.invalid_context.contains(&[100]));
    }

    #[test]
    fn test_wrapping_assumption_only_without_nsw() {
        let (func, header) = one_loop(32);
        let loops = [header];
        let domain = crate::polyhedral::parse_set("[N] -> { [i] : 0 <= i < N }").unwrap();
        let base = SymExpr::mul(SymExpr::constant(4).with_bits(32), i32_iv(header));

        let mut scop = Scop::new("f", PolyCtx::unlimited());
        scop.add_parameter("N", Some(SymExpr::arg("N")), 32);
        let mut aff = Affinator::new(&func, BTreeSet::new());
        aff.translate(&mut scop, &base.clone().with_nsw(), Location::new(&loops).at(header, &domain));
        assert!(!scop.assumptions.iter().any(|a| a.kind == AssumptionKind::Wrapping));

        let mut scop = Scop::new("f", PolyCtx::unlimited());
        scop.add_parameter("N", Some(SymExpr::arg("N")), 32);
        let mut aff = Affinator::new(&func, BTreeSet::new());
        aff.translate(&mut scop, &base, Location::new(&loops));
        assert!(scop.assumptions.is_empty());
        aff.translate(&mut scop, &base, Location::new(&loops).at(header, &domain));
        assert!(scop.assumptions.iter().any(|a| a.kind == AssumptionKind::Wrapping));
        assert!(scop.invalid_context.contains(&[1 << 30]));
        assert!(!scop.invalid_context.contains(&[100]));
    }
}

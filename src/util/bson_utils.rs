use std::cmp::Ordering;
use std::collections::BTreeMap;
use bson::raw::RawBsonRef;
use bson::spec::BinarySubtype;
use bson::Bson;

/// Materializes an element borrowed from a raw BSON buffer as an owned [`Bson`] value.
pub fn raw_to_bson(value: RawBsonRef<'_>) -> bson::raw::Result<Bson> {
    Bson::try_from(value.to_raw_bson())
}

/// Compare two [`Bson`] values using **MongoDB’s canonical sort order**.
///
/// MongoDB orders BSON values in two steps:
///
/// 1. **Type rank** – A fixed ranking by BSON type
///    `MinKey < Null < Numbers < String < Document < Array < Binary < ObjectId`
///    `< Boolean < DateTime < Timestamp < RegularExpression < MaxKey`.
///
/// 2. **Within-type comparison** – If the two values share the same type,
///    comparison falls back to a rule specific to that type:
///    * numbers by numeric value (handling cross-family comparisons)
///    * strings lexicographically (UTF-8)
///    * documents by key, then by value (prefix wins)
///    * arrays element-by-element (prefix wins)
///
/// Returns `None` when either side holds a deprecated BSON variant (`Undefined`, `Symbol`,
/// `DBPointer`, ...), at any depth, or a `Decimal128` without a numeric reading.
/// Comparisons involving a `Decimal128` go through `f64`.
pub fn cmp_bson(a: &Bson, b: &Bson) -> Option<Ordering> {
    use Bson::*;

    let (ra, rb) = (type_rank(a)?, type_rank(b)?);
    if ra != rb {
        return Some(ra.cmp(&rb));
    }

    let ordering = match (a, b) {
        // numeric family
        (Double(x), Double(y))           => cmp_f64(*x, *y),
        (Int32(x),  Int32(y))            => x.cmp(y),
        (Int64(x),  Int64(y))            => x.cmp(y),
        (Decimal128(_), _) | (_, Decimal128(_)) => cmp_f64(numeric_value(a)?, numeric_value(b)?),

        // cross-numeric
        (Int32(x),  Double(y))           => cmp_f64(*x as f64, *y),
        (Int64(x),  Double(y))           => cmp_f64(*x as f64, *y),
        (Double(x), Int32(y))            => cmp_f64(*x, *y as f64),
        (Double(x), Int64(y))            => cmp_f64(*x, *y as f64),
        (Int32(x),  Int64(y))            => (*x as i64).cmp(y),
        (Int64(x),  Int32(y))            => x.cmp(&(*y as i64)),

        // simple scalars
        (String(x), String(y))           => x.cmp(y),
        (Boolean(x), Boolean(y))         => x.cmp(y),
        (DateTime(x), DateTime(y))       => x.cmp(y),
        (ObjectId(x), ObjectId(y))       => x.bytes().cmp(&y.bytes()),
        (Timestamp(x), Timestamp(y))     => (x.time, x.increment).cmp(&(y.time, y.increment)),

        (Binary(x), Binary(y)) => match subtype_code(x.subtype).cmp(&subtype_code(y.subtype)) {
            Ordering::Equal => x.bytes.cmp(&y.bytes),
            other           => other,
        },

        (RegularExpression(x), RegularExpression(y)) => match x.pattern.cmp(&y.pattern) {
            Ordering::Equal => x.options.cmp(&y.options),
            other           => other,
        },

        // compound types
        (Array(av), Array(bv)) => {
            for (ai, bi) in av.iter().zip(bv.iter()) {
                let ord = cmp_bson(ai, bi)?;
                if ord != Ordering::Equal {
                    return Some(ord);
                }
            }
            av.len().cmp(&bv.len())
        }
        (Document(ad), Document(bd)) => {
            for ((ak, av), (bk, bv)) in ad.iter().zip(bd.iter()) {
                match ak.cmp(bk) {
                    Ordering::Equal => {
                        let ord = cmp_bson(av, bv)?;
                        if ord != Ordering::Equal {
                            return Some(ord);
                        }
                    }
                    other => return Some(other),
                }
            }
            ad.len().cmp(&bd.len())
        }

        // identical MinKey / MaxKey / Null, etc.
        _ => Ordering::Equal,
    };
    Some(ordering)
}

/// Orders floats the way MongoDB does: `NaN` sorts below every number and equals itself.
fn cmp_f64(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Numeric reading of a number of any family.
fn numeric_value(v: &Bson) -> Option<f64> {
    match v {
        Bson::Double(x) => Some(*x),
        Bson::Int32(x) => Some(*x as f64),
        Bson::Int64(x) => Some(*x as f64),
        Bson::Decimal128(x) => x.to_string().parse().ok(),
        _ => None,
    }
}

/// Position of the value's type in the canonical sort order, `None` for deprecated types.
///
/// Range comparisons (`$gt`, `$lt`, ...) only match values of the same rank.
pub fn type_rank(v: &Bson) -> Option<u8> {
    use Bson::*;

    let rank = match v {
        MinKey                                    => 0,
        Null                                      => 1,
        Double(_)|Int32(_)|Int64(_)|Decimal128(_) => 2,
        String(_)                                 => 3,
        Document(_)                               => 4,
        Array(_)                                  => 5,
        Binary(_)                                 => 6,
        ObjectId(_)                               => 7,
        Boolean(_)                                => 8,
        DateTime(_)                               => 9,
        Timestamp(_)                              => 10,
        RegularExpression(_)                      => 11,
        MaxKey                                    => 12,
        _ /* legacy variants */                   => return None,
    };
    Some(rank)
}

/// Equality with MongoDB semantics: numbers compare across families, `NaN == NaN`
/// and document field order does not matter.
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Double(x), Bson::Double(y)) if x.is_nan() && y.is_nan() => true,
        (Bson::Int32(x), Bson::Int32(y)) => x == y,
        (Bson::Int64(x), Bson::Int64(y)) => x == y,
        (Bson::Double(x), Bson::Double(y)) => (x - y).abs() < f64::EPSILON,

        (Bson::Int32(x), Bson::Int64(y)) => *x as i64 == *y,
        (Bson::Int32(x), Bson::Double(y)) => (*x as f64 - *y).abs() < f64::EPSILON,
        (Bson::Int64(x), Bson::Double(y)) => (*x as f64 - *y).abs() < f64::EPSILON,
        (Bson::Int64(x), Bson::Int32(y)) => *x == *y as i64,
        (Bson::Double(x), Bson::Int32(y)) => (*x - *y as f64).abs() < f64::EPSILON,
        (Bson::Double(x), Bson::Int64(y)) => (*x - *y as f64).abs() < f64::EPSILON,

        (Bson::Decimal128(_), _) | (_, Bson::Decimal128(_)) if a != b => {
            match (numeric_value(a), numeric_value(b)) {
                (Some(x), Some(y)) => cmp_f64(x, y) == Ordering::Equal,
                _ => false,
            }
        }

        (Bson::Document(a), Bson::Document(b)) => {
            let a_sorted: BTreeMap<_, _> = a.iter().collect();
            let b_sorted: BTreeMap<_, _> = b.iter().collect();
            a_sorted.len() == b_sorted.len()
                && a_sorted
                    .iter()
                    .zip(b_sorted.iter())
                    .all(|((ak, av), (bk, bv))| ak == bk && bson_eq(av, bv))
        }

        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|(x, y)| bson_eq(x, y))
        }

        _ => a == b,
    }
}

fn subtype_code(s: BinarySubtype) -> u8 { s.into() }

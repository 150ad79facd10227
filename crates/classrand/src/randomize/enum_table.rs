use crate::HashMap;
use crate::ir::{BinaryOp, DType, DTypeId, ExprId, FileLine, Netlist, VarId, VarKind};
use crate::randomize::error::RandomizeError;
use log::trace;
use num_bigint::BigUint;

/// Per-pass cache of constant enum value tables.
///
/// A table holds the values of an enum's items in declaration order so that a
/// random in-range index yields a valid enum value. One table exists per enum
/// type no matter how many members use it. Constraints on an enum member draw
/// from a subset table holding only the values they allow.
#[derive(Debug, Default)]
pub struct EnumTableCache {
    tables: HashMap<DTypeId, VarId>,
    subsets: HashMap<(DTypeId, Vec<BigUint>), VarId>,
    count: usize,
}

impl EnumTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, enum_dtype: DTypeId) -> Option<VarId> {
        self.tables.get(&enum_dtype).copied()
    }

    /// Number of tables created, subset tables included.
    pub fn len(&self) -> usize {
        self.tables.len() + self.subsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.subsets.is_empty()
    }

    /// Returns the table for `enum_dtype`, creating it in the unit package on first use.
    pub fn table_for(
        &mut self,
        netlist: &mut Netlist,
        enum_dtype: DTypeId,
        loc: FileLine,
    ) -> Result<VarId, RandomizeError> {
        if let Some(table) = self.get(enum_dtype) {
            return Ok(table);
        }
        let Some(enum_type) = netlist.dtypes.as_enum(enum_dtype) else {
            return Err(RandomizeError::StructuralInvariant {
                loc,
                detail: format!("{} is not an enum type", netlist.dtype_name(enum_dtype)),
            });
        };
        if enum_type.items.is_empty() {
            return Err(RandomizeError::StructuralInvariant {
                loc,
                detail: format!("enum {} has no items", enum_type.name),
            });
        }
        let mut values = Vec::with_capacity(enum_type.item_count());
        for item in &enum_type.items {
            let Some(value) = &item.value else {
                return Err(RandomizeError::StructuralInvariant {
                    loc,
                    detail: format!(
                        "enum item {}::{} has no constant value",
                        enum_type.name, item.name
                    ),
                });
            };
            values.push(value.clone());
        }

        let table = self.create(netlist, enum_dtype, values, loc);
        self.tables.insert(enum_dtype, table);
        Ok(table)
    }

    /// Table holding only `values` of `enum_dtype`, in the given order. Equal
    /// subsets of the same enum share one table.
    pub fn subset_table_for(
        &mut self,
        netlist: &mut Netlist,
        enum_dtype: DTypeId,
        values: Vec<BigUint>,
        loc: FileLine,
    ) -> Result<VarId, RandomizeError> {
        if values.is_empty() {
            return Err(RandomizeError::StructuralInvariant {
                loc,
                detail: format!("empty value table for {}", netlist.dtype_name(enum_dtype)),
            });
        }
        let key = (enum_dtype, values);
        if let Some(table) = self.subsets.get(&key) {
            return Ok(*table);
        }
        let table = self.create(netlist, enum_dtype, key.1.clone(), loc);
        self.subsets.insert(key, table);
        Ok(table)
    }

    fn create(
        &mut self,
        netlist: &mut Netlist,
        enum_dtype: DTypeId,
        values: Vec<BigUint>,
        loc: FileLine,
    ) -> VarId {
        let array_dtype = netlist.dtypes.add(DType::UnpackArray {
            elem: enum_dtype,
            len: values.len(),
        });
        let elems = values
            .into_iter()
            .map(|value| netlist.const_value(enum_dtype, value))
            .collect();
        let init = netlist.init_array(array_dtype, elems);

        let name = format!("__Venumvaltab_{}", self.count);
        self.count += 1;
        let table = netlist.new_var(&name, array_dtype, VarKind::PackageStatic);
        let var = &mut netlist.vars[table.0];
        var.loc = loc;
        var.is_const = true;
        var.init = Some(init);
        netlist.unit_package.push(table);
        trace!("randomize: created {} for {}", name, netlist.dtype_name(enum_dtype));
        table
    }

    /// `table[$random % len]`
    pub fn random_entry(netlist: &mut Netlist, table: VarId) -> ExprId {
        let (elem, len) = match netlist.dtypes.get(netlist.var(table).dtype) {
            DType::UnpackArray { elem, len } => (*elem, *len),
            _ => unreachable!("enum value table is not an unpacked array"),
        };
        let u32t = netlist.dtypes.basic(32, false);
        let raw = netlist.random(u32t);
        let count = netlist.const_u64(u32t, len as u64);
        let index = netlist.binary(BinaryOp::ModDiv, raw, count);
        let table = netlist.var_ref(table);
        netlist.array_sel(table, index, elem)
    }
}

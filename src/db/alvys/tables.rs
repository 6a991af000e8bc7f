//! Column mappings from Alvys JSON records to the staging tables.

use crate::alvys::entity::Entity;

/// How a JSON value is converted for a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Trimmed string truncated to this many characters, blank is null.
    Text(usize),
    Float,
    /// Like `Float` but missing values load as 0.
    FloatOrZero,
    Int,
    /// 0 or 1, missing is 0.
    Flag,
    Timestamp,
    /// A currency given either as a string or as `{"Code": ...}`.
    Code(usize),
}

/// Where a column value comes from.
#[derive(Clone, Copy, Debug)]
pub enum Source {
    /// Nested field of the record.
    Path(&'static [&'static str]),
    /// First non-null of several nested fields.
    FirstOf(&'static [&'static [&'static str]]),
    /// Nested field of the parent record, for child tables.
    Parent(&'static [&'static str]),
    /// 1-based position in the parent's array.
    Ordinal,
    /// Nested field, falling back to `{parent key}_{ordinal}`.
    PathOrOrdinal(&'static [&'static str]),
    FileId,
}

#[derive(Clone, Copy, Debug)]
pub struct Column {
    pub name: &'static str,
    pub source: Source,
    pub kind: Kind,
}

#[derive(Debug)]
pub struct ChildTable {
    /// Array field of the parent record holding the child records.
    pub array: &'static str,
    pub table: &'static TableSpec,
}

/// A destination table.  The first column is the `ID` key.
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub children: &'static [ChildTable],
}

impl TableSpec {
    pub fn key(&self) -> &'static Column {
        &self.columns[0]
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    /// This table followed by its child tables.
    pub fn tables(&'static self) -> Vec<&'static TableSpec> {
        let mut out = vec![self];
        out.extend(self.children.iter().map(|c| c.table));
        out
    }
}

const fn text(name: &'static str, path: &'static [&'static str], len: usize) -> Column {
    Column {
        name,
        source: Source::Path(path),
        kind: Kind::Text(len),
    }
}

const fn float(name: &'static str, path: &'static [&'static str]) -> Column {
    Column {
        name,
        source: Source::Path(path),
        kind: Kind::Float,
    }
}

const fn money(name: &'static str, path: &'static [&'static str]) -> Column {
    Column {
        name,
        source: Source::Path(path),
        kind: Kind::FloatOrZero,
    }
}

const fn flag(name: &'static str, path: &'static [&'static str]) -> Column {
    Column {
        name,
        source: Source::Path(path),
        kind: Kind::Flag,
    }
}

const fn ts(name: &'static str, path: &'static [&'static str]) -> Column {
    Column {
        name,
        source: Source::Path(path),
        kind: Kind::Timestamp,
    }
}

const fn parent(name: &'static str, path: &'static [&'static str], len: usize) -> Column {
    Column {
        name,
        source: Source::Parent(path),
        kind: Kind::Text(len),
    }
}

const FILE_ID: Column = Column {
    name: "FILE_ID",
    source: Source::FileId,
    kind: Kind::Text(50),
};

pub static LOADS: TableSpec = TableSpec {
    name: "LOADS_RAW",
    columns: &[
        text("ID", &["Id"], 100),
        text("LOAD_NUMBER", &["LoadNumber"], 100),
        text("ORDER_NUMBER", &["OrderNumber"], 100),
        text("LOAD_STATUS", &["Status"], 50),
        text("CUSTOMER_ID", &["CustomerId"], 100),
        text("FLEET_ID", &["Fleet", "Id"], 100),
        text("FLEET_NAME", &["Fleet", "Name"], 100),
        text("INVOICE_AS", &["InvoiceAs"], 50),
        float("LINEHAUL_AMOUNT", &["Linehaul", "Amount"]),
        float("FUEL_SURCHARGE", &["FuelSurcharge", "Amount"]),
        float("ACCESSORIALS_AMOUNT", &["CustomerAccessorials", "Amount"]),
        float("CUSTOMER_RATE", &["CustomerRate", "Amount"]),
        float("CUSTOMER_MILEAGE", &["CustomerMileage", "Distance", "Value"]),
        text("MILEAGE_SOURCE", &["CustomerMileage", "Source"], 50),
        float("TOTAL_WEIGHT", &["Weight", "Value"]),
        ts("SCHEDULED_PICKUP", &["ScheduledPickupAt"]),
        ts("SCHEDULED_DELIVERY", &["ScheduledDeliveryAt"]),
        ts("PICKED_UP_AT", &["PickedUpAt"]),
        ts("DELIVERED_AT", &["DeliveredAt"]),
        ts("CREATED_DTTM", &["CreatedAt"]),
        text("CUSTOMER_SERVICE_REP_ID", &["CustomerServiceRepId"], 100),
        text("CUSTOMER_SALES_AGENT_ID", &["CustomerSalesAgentId"], 100),
        ts("UPDATED_DTTM", &["UpdatedAt"]),
        flag("IS_DELETED", &["IsDeleted"]),
        FILE_ID,
        text("LOAD_TYPE", &["LoadType"], 50),
    ],
    children: &[],
};

pub static TRIP_STOPS: TableSpec = TableSpec {
    name: "TRIP_STOPS_RAW",
    columns: &[
        Column {
            name: "ID",
            source: Source::PathOrOrdinal(&["Id"]),
            kind: Kind::Text(100),
        },
        parent("TRIP_ID", &["Id"], 100),
        parent("TRIP_NUMBER", &["TripNumber"], 100),
        Column {
            name: "STOP_SEQUENCE",
            source: Source::Ordinal,
            kind: Kind::Int,
        },
        flag("IS_APPOINTMENT_REQUESTED", &["AppointmentRequested"]),
        flag("IS_APPOINTMENT_CONFIRMED", &["AppointmentConfirmed"]),
        Column {
            name: "EARLIEST_APPOINTMENT_DTTM",
            source: Source::FirstOf(&[&["AppointmentDate"], &["StopWindow", "Begin"]]),
            kind: Kind::Timestamp,
        },
        ts("LATEST_APPOINTMENT_DTTM", &["StopWindow", "End"]),
        text("STREET_ADDRESS", &["Address", "Street"], 200),
        text("CITY", &["Address", "City"], 100),
        text("STATE_PROVINCE", &["Address", "State"], 50),
        text("POSTAL_CD", &["Address", "ZipCode"], 20),
        float("LATITUDE", &["Coordinates", "Latitude"]),
        float("LONGITUDE", &["Coordinates", "Longitude"]),
        text("STOP_STATUS", &["Status"], 50),
        text("STOP_TYPE", &["StopType"], 50),
        text("STOP_SCHEDULE_TYPE", &["ScheduleType"], 50),
        text("LOADING_TYPE", &["LoadingType"], 50),
        ts("ARRIVED_DTTM", &["ArrivedAt"]),
        ts("DEPARTED_DTTM", &["DepartedAt"]),
        FILE_ID,
        text("LOC_ID", &["CompanyNumber"], 100),
        text("LOC_NAME", &["CompanyName"], 200),
    ],
    children: &[],
};

pub static TRIPS: TableSpec = TableSpec {
    name: "TRIPS_RAW",
    columns: &[
        text("ID", &["Id"], 100),
        text("TRIP_NUMBER", &["TripNumber"], 100),
        text("TRIP_STATUS", &["Status"], 50),
        text("LOAD_NUMBER", &["LoadNumber"], 100),
        text("TENDER_AS", &["TenderAs"], 50),
        float("TOTAL_MILEAGE", &["TotalMileage", "Distance", "Value"]),
        text("MILEAGE_SOURCE", &["TotalMileage", "Source"], 50),
        text("MILEAGE_PROFILE_NAME", &["TotalMileage", "ProfileName"], 100),
        float("EMPTY_MILEAGE", &["EmptyMileage", "Distance", "Value"]),
        float("LOADED_MILEAGE", &["LoadedMileage", "Distance", "Value"]),
        ts("PICKUP_DTTM", &["PickupDate"]),
        ts("DELIVERY_DTTM", &["DeliveryDate"]),
        ts("PICKED_UP_DTTM", &["PickedUpAt"]),
        ts("DELIVERED_DTTM", &["DeliveredAt"]),
        ts("CARRIER_ASSIGNED_DTTM", &["CarrierAssignedAt"]),
        ts("RELEASED_DTTM", &["ReleasedAt"]),
        float("TRIP_VALUE", &["TripValue", "Amount"]),
        text("TRUCK_ID", &["Truck", "Id"], 100),
        text("TRUCK_FLEET_ID", &["Truck", "Fleet", "Id"], 100),
        text("TRUCK_FLEET_NAME", &["Truck", "Fleet", "Name"], 100),
        text("TRAILER_ID", &["Trailer", "Id"], 100),
        text("TRAILER_TYPE", &["Trailer", "EquipmentType"], 50),
        text("DRIVER1_ID", &["Driver1", "Id"], 100),
        text("DRIVER1_TYPE", &["Driver1", "ContractorType"], 50),
        text("DRIVER1_FLEET_ID", &["Driver1", "Fleet", "Id"], 100),
        text("DRIVER2_ID", &["Driver2", "Id"], 100),
        text("DRIVER2_TYPE", &["Driver2", "ContractorType"], 50),
        text("DRIVER2_FLEET_ID", &["Driver2", "Fleet", "Id"], 100),
        text("OWNER_OPERATOR_ID", &["OwnerOperator", "Id"], 100),
        text("RELEASED_BY", &["ReleasedBy"], 100),
        text("DISPATCHED_BY", &["DispatchedBy"], 100),
        text("DISPATCHER_ID", &["DispatcherId"], 100),
        flag("IS_CARRIER_PAY_ON_HOLD", &["CarrierPayOnHold"]),
        text("CARRIER_ID", &["Carrier", "Id"], 100),
        text("CARRIER_INVOICE", &["Carrier", "CarrierInvoiceNumber"], 100),
        float("CARRIER_RATE", &["Carrier", "Rate", "Amount"]),
        float("CARRIER_LINEHAUL", &["Carrier", "Linehaul", "Amount"]),
        float("CARRIER_FUEL", &["Carrier", "Fuel", "Amount"]),
        float("CARRIER_ACCESSORIALS", &["Carrier", "Accessorials", "Amount"]),
        float("CARRIER_TOTAL_PAYABLE", &["Carrier", "TotalPayable", "Amount"]),
        ts("UPDATED_DTTM", &["UpdatedAt"]),
        flag("IS_DELETED", &["IsDeleted"]),
        FILE_ID,
    ],
    children: &[ChildTable {
        array: "Stops",
        table: &TRIP_STOPS,
    }],
};

pub static INVOICE_LINE_ITEMS: TableSpec = TableSpec {
    name: "INVOICE_LINE_ITEMS_RAW",
    columns: &[
        text("ID", &["Id"], 150),
        parent("INVOICE_ID", &["Id"], 100),
        parent("INVOICE_NUMBER", &["Number"], 100),
        text("LINE_ITEM_NAME", &["Name"], 100),
        money("LINE_ITEM_AMOUNT", &["Amount", "Amount"]),
        Column {
            name: "LINE_ITEM_CURRENCY_CODE",
            source: Source::Path(&["Amount", "Currency"]),
            kind: Kind::Code(10),
        },
        money("LINE_ITEM_RATE", &["Rate", "Rate"]),
        text("LINE_ITEM_UNITS", &["Rate", "Units"], 20),
        text("LINE_ITEM_UNIT_TYPE", &["Rate", "UnitOfMeasurement"], 50),
        text("LOAD_NUMBER", &["LoadNumber"], 100),
        text("LINE_ITEM_CATEGORY", &["Category"], 50),
        FILE_ID,
    ],
    children: &[],
};

pub static INVOICES: TableSpec = TableSpec {
    name: "INVOICES_RAW",
    columns: &[
        text("ID", &["Id"], 100),
        text("INVOICE_NUMBER", &["Number"], 100),
        text("INVOICE_TYPE", &["Type"], 50),
        text("INVOICE_STATUS", &["Status"], 50),
        ts("CREATED_DTTM", &["CreatedDate"]),
        ts("BILLED_DATE", &["InvoicedDate"]),
        FILE_ID,
        text("CUSTOMER_ID", &["Customer", "Id"], 100),
        money("INVOICE_AMOUNT", &["Total", "Amount"]),
    ],
    children: &[ChildTable {
        array: "LineItems",
        table: &INVOICE_LINE_ITEMS,
    }],
};

pub static DRIVERS: TableSpec = TableSpec {
    name: "DRIVERS_RAW",
    columns: &[
        text("ID", &["Id"], 100),
        text("EMPLOYEE_ID", &["EmployeeId"], 100),
        text("DRIVER_TYPE", &["Type"], 50),
        text("SUBSIDIARY_ID", &["SubsidiaryId"], 100),
        text("ZIP_CODE", &["Address", "ZipCode"], 20),
        text("FLEET_ID", &["Fleet", "Id"], 100),
        text("FLEET_NAME", &["Fleet", "Name"], 100),
        ts("CREATED_DTTM", &["CreatedAt"]),
        flag("IS_ACTIVE", &["IsActive"]),
        ts("HIRED_DTTM", &["HiredAt"]),
        FILE_ID,
    ],
    children: &[],
};

pub static TRUCKS: TableSpec = TableSpec {
    name: "TRUCKS_RAW",
    columns: &[
        text("ID", &["Id"], 100),
        text("TRUCK_NUM", &["TruckNum"], 100),
        text("TRUCK_STATUS", &["Status"], 50),
        text("VIN_NUMBER", &["VinNumber"], 50),
        text("YEAR", &["Year"], 10),
        text("MAKE", &["Make"], 100),
        text("MODEL", &["Model"], 100),
        text("LICENSE_STATE", &["LicenseState"], 50),
        text("TRUCK_TYPE", &["TruckType"], 50),
        text("SUBSIDIARY_ID", &["SubsidiaryId"], 100),
        text("FLEET_ID", &["Fleet", "Id"], 100),
        text("FLEET_NAME", &["Fleet", "Name"], 100),
        ts("CREATED_DTTM", &["CreatedAt"]),
        FILE_ID,
    ],
    children: &[],
};

pub static TRAILERS: TableSpec = TableSpec {
    name: "TRAILERS_RAW",
    columns: &[
        text("ID", &["Id"], 100),
        text("TRAILER_NUM", &["TrailerNum"], 100),
        text("TRAILER_TYPE", &["TrailerType"], 50),
        text("TRAILER_STATUS", &["Status"], 50),
        ts("CREATED_DTTM", &["CreatedAt"]),
        FILE_ID,
    ],
    children: &[],
};

pub static CUSTOMERS: TableSpec = TableSpec {
    name: "CUSTOMERS_RAW",
    columns: &[
        text("ID", &["Id"], 100),
        text("CUSTOMER_NAME", &["Name"], 200),
        text("COMPANY_NUMBER", &["CompanyNumber"], 100),
        text("CUSTOMER_TYPE", &["Type"], 50),
        text("CUSTOMER_STATUS", &["Status"], 50),
        text("BILLING_ADDRESS", &["BillingAddress", "Street"], 200),
        text("CITY", &["BillingAddress", "City"], 100),
        text("STATE_PROVINCE", &["BillingAddress", "State"], 50),
        text("POSTAL_CD", &["BillingAddress", "ZipCode"], 20),
        text("INVOICING_NAME", &["InvoicingInformation", "InvoicingName"], 200),
        text("INVOICING_ALIAS", &["InvoicingInformation", "InvoicingNameAlias"], 200),
        ts("CREATED_DTTM", &["DateCreated"]),
        FILE_ID,
    ],
    children: &[],
};

pub static CARRIERS: TableSpec = TableSpec {
    name: "CARRIERS_RAW",
    columns: &[
        text("ID", &["Id"], 100),
        text("CARRIER_NAME", &["Name"], 200),
        text("EXTERNAL_NAME", &["ExternalName"], 200),
        text("MC_NUM", &["McNum"], 50),
        text("DOT_NUM", &["UsDotNum"], 50),
        text("CARRIER_STATUS", &["Status"], 50),
        text("CARRIER_TYPE", &["Type"], 50),
        text("CARRIER_SOURCE", &["Source"], 50),
        ts("CREATED_DTTM", &["CreatedAt"]),
        ts("UPDATED_DTTM", &["UpdatedAt"]),
        FILE_ID,
    ],
    children: &[],
};

impl PartialEq for TableSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// The top level table of an entity.
pub fn table_spec(entity: Entity) -> &'static TableSpec {
    match entity {
        Entity::Loads => &LOADS,
        Entity::Trips => &TRIPS,
        Entity::Invoices => &INVOICES,
        Entity::Drivers => &DRIVERS,
        Entity::Trucks => &TRUCKS,
        Entity::Trailers => &TRAILERS,
        Entity::Customers => &CUSTOMERS,
        Entity::Carriers => &CARRIERS,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn every_table_is_keyed_on_id() {
        for entity in Entity::ALL {
            for table in table_spec(entity).tables() {
                assert_eq!(table.key().name, "ID", "{}", table.name);
                assert!(table.position("FILE_ID").is_some(), "{}", table.name);
                let names: HashSet<&str> = table.columns.iter().map(|c| c.name).collect();
                assert_eq!(names.len(), table.columns.len(), "{}", table.name);
            }
        }
        assert_eq!(
            table_spec(Entity::Trips)
                .tables()
                .iter()
                .map(|t| t.name)
                .collect::<Vec<_>>(),
            vec!["TRIPS_RAW", "TRIP_STOPS_RAW"]
        );
    }
}

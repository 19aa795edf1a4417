use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

/// Identifiers are opaque tokens: compared and hashed, never used in arithmetic.
pub type Id = String;

// Raw rows carry the normalized (prefixed/renamed) column names, see `loader::SourceSchema`.

#[derive(Debug, Deserialize)]
pub struct RawCanteen {
    pub canteen_id: Option<String>,
    pub canteen_name: Option<String>,
    pub canteen_city: Option<String>,
    pub canteen_address: Option<String>,
    pub canteen_latitude: Option<String>,
    pub canteen_longitude: Option<String>,
    pub canteen_created_at: Option<String>,
    pub canteen_updated_at: Option<String>,
    pub canteen_last_fetched_at: Option<String>,
    pub canteen_state: Option<String>,
    pub canteen_replaced_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawDay {
    pub days_id: Option<String>,
    pub canteen_id: Option<String>,
    pub date: Option<String>,
    pub days_closed: Option<String>,
    pub days_created_at: Option<String>,
    pub days_updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMeal {
    pub meal_id: Option<String>,
    pub day_id: Option<String>,
    pub meal_name: Option<String>,
    pub meal_category: Option<String>,
    pub meal_price_student: Option<String>,
    pub meal_price_employee: Option<String>,
    pub meal_price_pupil: Option<String>,
    pub meal_price_other: Option<String>,
    pub meal_created_at: Option<String>,
    pub meal_updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawNote {
    pub notes_id: Option<String>,
    pub notes_name: Option<String>,
    pub notes_created_at: Option<String>,
    pub notes_updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawNoteAssociation {
    pub mapper_id: Option<String>,
    pub meal_id: Option<String>,
    pub note_id: Option<String>,
}

/// Row of the curated list of canteens confirmed to belong to a university.
#[derive(Debug, Clone, Deserialize)]
pub struct CuratedCanteen {
    #[serde(rename = "Kantine")]
    pub name: Option<String>,
    #[serde(rename = "Adresse")]
    pub address: Option<String>,
    #[serde(rename = "Studierendenwerk")]
    pub operator: Option<String>,
}

/// Row of the manual category lookup table.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryMapping {
    pub category: String,
    pub super_category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgType {
    School,
    Kindergarten,
    University,
    Company,
    Other,
}

impl OrgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgType::School => "school",
            OrgType::Kindergarten => "kindergarten",
            OrgType::University => "university",
            OrgType::Company => "company",
            OrgType::Other => "other",
        }
    }
}

impl fmt::Display for OrgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuperCategory {
    MainDish,
    SideDish,
    Salad,
    Soup,
    Dessert,
    BakedGoods,
    Other,
    /// No manual mapping exists for the raw category.
    Unmatched,
}

impl SuperCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuperCategory::MainDish => "main_dish",
            SuperCategory::SideDish => "side_dish",
            SuperCategory::Salad => "salad",
            SuperCategory::Soup => "soup",
            SuperCategory::Dessert => "dessert",
            SuperCategory::BakedGoods => "baked_goods",
            SuperCategory::Other => "other",
            SuperCategory::Unmatched => "unmatched",
        }
    }
}

impl FromStr for SuperCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "main_dish" => Ok(SuperCategory::MainDish),
            "side_dish" => Ok(SuperCategory::SideDish),
            "salad" => Ok(SuperCategory::Salad),
            "soup" => Ok(SuperCategory::Soup),
            "dessert" => Ok(SuperCategory::Dessert),
            "baked_goods" => Ok(SuperCategory::BakedGoods),
            "other" => Ok(SuperCategory::Other),
            "unmatched" | "" => Ok(SuperCategory::Unmatched),
            other => Err(format!("unknown super category `{other}`")),
        }
    }
}

impl fmt::Display for SuperCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Canteen {
    #[serde(skip)]
    pub row: usize,
    pub canteen_id: Id,
    pub name: String,
    pub city: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub last_fetched_at: Option<NaiveDateTime>,
    pub state: Option<String>,
    pub replaced_by: Option<Id>,
    pub country: Option<String>,
    pub organization_type: Option<OrgType>,
}

/// A day as loaded, before the date repair.
#[derive(Debug, Clone)]
pub struct DayRecord {
    pub row: usize,
    pub day_id: Id,
    pub canteen_id: Id,
    pub date: String,
    pub closed: bool,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Day {
    #[serde(skip)]
    pub row: usize,
    pub day_id: Id,
    pub canteen_id: Id,
    pub date: String,
    pub date_correct: NaiveDate,
    pub closed: bool,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Prices {
    pub student: Option<f64>,
    pub employee: Option<f64>,
    pub pupil: Option<f64>,
    pub other: Option<f64>,
}

impl Prices {
    pub fn map(self, f: impl Fn(Option<f64>) -> Option<f64>) -> Prices {
        Prices {
            student: f(self.student),
            employee: f(self.employee),
            pupil: f(self.pupil),
            other: f(self.other),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<f64>> {
        [self.student, self.employee, self.pupil, self.other].into_iter()
    }
}

/// A meal as loaded, keyed to its day only.
#[derive(Debug, Clone)]
pub struct MealRecord {
    pub row: usize,
    pub meal_id: Id,
    pub day_id: Id,
    pub name: String,
    pub category: String,
    pub prices: Prices,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

/// A meal joined to its day and canteen.
#[derive(Debug, Clone)]
pub struct Meal {
    pub row: usize,
    pub meal_id: Id,
    pub day_id: Id,
    pub canteen_id: Id,
    pub date_correct: NaiveDate,
    pub name: String,
    pub category: String,
    pub super_category: SuperCategory,
    pub prices: Prices,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct Note {
    pub row: usize,
    pub note_id: Id,
    pub name: String,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct NoteAssociation {
    pub row: usize,
    pub mapper_id: Id,
    pub meal_id: Id,
    pub note_id: Id,
}

/// Semicolon-joined note labels of one meal and how many labels were present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteList {
    pub list: String,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct MealWithNotes {
    pub meal: Meal,
    pub notes: NoteList,
    pub notes_90: NoteList,
}

/// Flat output row of the cleaned meal table.
#[derive(Debug, Serialize)]
pub struct CleanMealRow<'a> {
    pub meal_id: &'a str,
    pub day_id: &'a str,
    pub canteen_id: &'a str,
    pub date_correct: NaiveDate,
    pub meal_name: &'a str,
    pub meal_category: &'a str,
    pub meal_super_category: SuperCategory,
    pub meal_price_student: Option<f64>,
    pub meal_price_employee: Option<f64>,
    pub meal_price_pupil: Option<f64>,
    pub meal_price_other: Option<f64>,
    pub meal_created_at: Option<NaiveDateTime>,
    pub meal_updated_at: Option<NaiveDateTime>,
    pub notes_list: &'a str,
    pub notes_count: usize,
    pub notes_list_90: &'a str,
    pub notes_count_90: usize,
}

impl<'a> From<&'a MealWithNotes> for CleanMealRow<'a> {
    fn from(m: &'a MealWithNotes) -> Self {
        CleanMealRow {
            meal_id: &m.meal.meal_id,
            day_id: &m.meal.day_id,
            canteen_id: &m.meal.canteen_id,
            date_correct: m.meal.date_correct,
            meal_name: &m.meal.name,
            meal_category: &m.meal.category,
            meal_super_category: m.meal.super_category,
            meal_price_student: m.meal.prices.student,
            meal_price_employee: m.meal.prices.employee,
            meal_price_pupil: m.meal.prices.pupil,
            meal_price_other: m.meal.prices.other,
            meal_created_at: m.meal.created_at,
            meal_updated_at: m.meal.updated_at,
            notes_list: &m.notes.list,
            notes_count: m.notes.count,
            notes_list_90: &m.notes_90.list,
            notes_count_90: m.notes_90.count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteFrequency {
    pub note_id: Id,
    pub notes_name: Option<String>,
    pub count: usize,
    pub percent: f64,
    pub cum_sum: usize,
    pub cum_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryFrequency {
    pub meal_category: String,
    pub count: usize,
    pub cum_sum: usize,
    pub cum_percent: f64,
}

fn display_metric(v: &Option<f64>) -> String {
    match v {
        Some(x) => format!("{x:.2}"),
        None => "-".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct IndicatorRecord {
    #[tabled(rename = "Canteen")]
    pub canteen_id: Id,
    #[tabled(rename = "Year")]
    pub year: i32,
    #[tabled(rename = "Month")]
    pub month: u32,
    #[tabled(rename = "AvgMeals", display_with = "display_metric")]
    pub avg_count_meals: Option<f64>,
    #[tabled(rename = "AvgMain", display_with = "display_metric")]
    pub avg_count_main_dishes: Option<f64>,
    #[tabled(rename = "AvgVeg", display_with = "display_metric")]
    pub avg_count_vegetarian: Option<f64>,
    #[tabled(rename = "PctVeg", display_with = "display_metric")]
    pub avg_percent_vegetarian: Option<f64>,
    #[tabled(rename = "AvgVegan", display_with = "display_metric")]
    pub avg_count_vegan: Option<f64>,
    #[tabled(rename = "PctVegan", display_with = "display_metric")]
    pub avg_percent_vegan: Option<f64>,
    #[tabled(rename = "MainPrice", display_with = "display_metric")]
    pub avg_price_main_dish_student: Option<f64>,
    #[tabled(rename = "AvgWholeGrain", display_with = "display_metric")]
    pub avg_count_whole_grain: Option<f64>,
    #[tabled(rename = "PctWholeGrain", display_with = "display_metric")]
    pub avg_percent_whole_grain: Option<f64>,
}

impl IndicatorRecord {
    pub fn empty(canteen_id: Id, year: i32, month: u32) -> Self {
        IndicatorRecord {
            canteen_id,
            year,
            month,
            avg_count_meals: None,
            avg_count_main_dishes: None,
            avg_count_vegetarian: None,
            avg_percent_vegetarian: None,
            avg_count_vegan: None,
            avg_percent_vegan: None,
            avg_price_main_dish_student: None,
            avg_count_whole_grain: None,
            avg_percent_whole_grain: None,
        }
    }

    pub fn has_data(&self) -> bool {
        [
            self.avg_count_meals,
            self.avg_count_main_dishes,
            self.avg_count_vegetarian,
            self.avg_percent_vegetarian,
            self.avg_count_vegan,
            self.avg_percent_vegan,
            self.avg_price_main_dish_student,
            self.avg_count_whole_grain,
            self.avg_percent_whole_grain,
        ]
        .iter()
        .any(Option::is_some)
    }
}
